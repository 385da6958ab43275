use super::commands::{is_comment, tokenize, Token, TokenStream};
use super::preprocessor::preprocess;
use super::types::{Expr, Function, JoinedLine, Node, Program, Stmt};
use crate::error::ParseError;
use std::collections::HashMap;
use std::rc::Rc;

enum Opener {
    While(Expr),
    If(Expr),
    Func { name: String, params: Vec<String> },
}

impl Opener {
    fn keyword(&self) -> &'static str {
        match self {
            Opener::While(_) => "while",
            Opener::If(_) => "if",
            Opener::Func { .. } => "func",
        }
    }
}

/// A block waiting for its `end`.
struct OpenBlock {
    opener: Opener,
    offset: usize,
    line: usize,
    body: Vec<Node>,
}

struct Builder {
    body: Vec<Node>,
    open: Vec<OpenBlock>,
    functions: HashMap<String, Rc<Function>>,
}

impl Builder {
    fn current(&mut self) -> &mut Vec<Node> {
        match self.open.last_mut() {
            Some(block) => &mut block.body,
            None => &mut self.body,
        }
    }

    fn in_function(&self) -> bool {
        self.open
            .iter()
            .any(|block| matches!(block.opener, Opener::Func { .. }))
    }

    fn close(&mut self) -> Result<(), String> {
        let block = self
            .open
            .pop()
            .ok_or_else(|| "`end` without an open block".to_string())?;
        let body: Rc<[Node]> = block.body.into();
        let stmt = match block.opener {
            Opener::While(cond) => Stmt::While(cond, body),
            Opener::If(cond) => Stmt::If(cond, body),
            Opener::Func { name, params } => {
                let function = Function {
                    name: name.clone(),
                    params,
                    body,
                    offset: block.offset,
                };
                self.functions.insert(name, Rc::new(function));
                return Ok(());
            }
        };
        self.current().push(Node {
            stmt,
            offset: block.offset,
            line: block.line,
        });
        Ok(())
    }

    fn statement(&mut self, logical: &JoinedLine, tokens: &[Token]) -> Result<(), String> {
        let mut stream = TokenStream::new(tokens);
        let Some(Token::Word(keyword)) = stream.next() else {
            return Err("expected a statement".to_string());
        };
        let line = logical.phys_start + 1;

        let stmt = match keyword.as_str() {
            "print" => Stmt::Print(stream.expression(true)?),
            "set" => {
                let name = stream.name("a variable name")?;
                stream.expect_assign()?;
                Stmt::Set(name, stream.expression(true)?)
            }
            "call" => Stmt::Call(stream.call()?),
            "return" => {
                if !self.in_function() {
                    return Err("`return` outside of a function".to_string());
                }
                if stream.is_empty() {
                    Stmt::Return(None)
                } else {
                    Stmt::Return(Some(stream.expression(true)?))
                }
            }
            "timeout" => {
                let callback = stream.name("a function name")?;
                let delay = stream.primary()?;
                let args = stream.arguments()?;
                Stmt::Timeout {
                    callback,
                    delay,
                    args,
                }
            }
            "poll" => Stmt::Poll,
            "while" | "if" => {
                let cond = stream.expression(false)?;
                stream.expect_end()?;
                let opener = if keyword == "while" {
                    Opener::While(cond)
                } else {
                    Opener::If(cond)
                };
                self.open.push(OpenBlock {
                    opener,
                    offset: logical.offset,
                    line,
                    body: Vec::new(),
                });
                return Ok(());
            }
            "func" => {
                if !self.open.is_empty() {
                    return Err("functions can only be defined at the top level".to_string());
                }
                let name = stream.name("a function name")?;
                if self.functions.contains_key(&name) {
                    return Err(format!("function `{}` is already defined", name));
                }
                let mut params = Vec::new();
                while !stream.is_empty() {
                    params.push(stream.name("a parameter name")?);
                }
                self.open.push(OpenBlock {
                    opener: Opener::Func { name, params },
                    offset: logical.offset,
                    line,
                    body: Vec::new(),
                });
                return Ok(());
            }
            "end" => {
                stream.expect_end()?;
                return self.close();
            }
            other => return Err(format!("unknown statement `{}`", other)),
        };
        stream.expect_end()?;

        self.current().push(Node {
            stmt,
            offset: logical.offset,
            line,
        });
        Ok(())
    }
}

/// Parse program text. Offsets in the result index into `text`.
pub fn parse_program(text: &str) -> Result<Program, ParseError> {
    let pre = preprocess(text);
    let mut builder = Builder {
        body: Vec::new(),
        open: Vec::new(),
        functions: HashMap::new(),
    };

    for logical in &pre.logical {
        if is_comment(&logical.text) {
            continue;
        }
        let line = logical.phys_start + 1;
        let tokens = tokenize(&logical.text).map_err(|message| ParseError::new(line, message))?;
        builder
            .statement(logical, &tokens)
            .map_err(|message| ParseError::new(line, message))?;
    }

    if let Some(block) = builder.open.last() {
        return Err(ParseError::new(
            block.line,
            format!("`{}` is missing its `end`", block.opener.keyword()),
        ));
    }

    Ok(Program {
        body: builder.body.into(),
        functions: builder.functions,
    })
}
