use super::types::{BinaryOp, CallExpr, Expr};
use crate::interpreter::Value;
use serde_json::Number;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(String),
    Number(Value),
    Str(String),
    Op(BinaryOp),
    Assign,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(word) => format!("`{}`", word),
            Token::Number(number) => format!("`{}`", number),
            Token::Str(text) => format!("{:?}", text),
            Token::Op(op) => format!("`{}`", op.symbol()),
            Token::Assign => "`=`".to_string(),
        }
    }

    fn is_operand(&self) -> bool {
        matches!(self, Token::Word(_) | Token::Number(_) | Token::Str(_))
    }
}

/// Check if line is a comment
pub fn is_comment(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }
    let first = trimmed.split_whitespace().next().unwrap_or("");
    first.eq_ignore_ascii_case("rem")
}

fn number_literal(text: &str) -> Result<Value, String> {
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Value::from(int));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("invalid number `{}`", text))
}

/// Split one logical line into tokens.
pub fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();
    let mut after_space = true;

    while let Some((start, ch)) = chars.next() {
        if ch.is_whitespace() {
            after_space = true;
            continue;
        }

        let negative_sign = ch == '-'
            && chars.peek().is_some_and(|&(_, next)| next.is_ascii_digit())
            && (after_space || !tokens.last().is_some_and(Token::is_operand));

        if ch.is_ascii_digit() || negative_sign {
            let mut end = start + ch.len_utf8();
            while let Some(&(i, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Number(number_literal(&line[start..end])?));
        } else if ch.is_alphabetic() || ch == '_' {
            let mut end = start + ch.len_utf8();
            while let Some(&(i, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(line[start..end].to_string()));
        } else if ch == '"' {
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next().map(|(_, e)| e) {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => text.push(other),
                        None => break,
                    },
                    other => text.push(other),
                }
            }
            if !closed {
                return Err("unterminated string".to_string());
            }
            tokens.push(Token::Str(text));
        } else {
            let next = chars.peek().map(|&(_, c)| c);
            let (token, wide) = match (ch, next) {
                ('=', Some('=')) => (Token::Op(BinaryOp::Eq), true),
                ('!', Some('=')) => (Token::Op(BinaryOp::Ne), true),
                ('<', Some('=')) => (Token::Op(BinaryOp::Le), true),
                ('>', Some('=')) => (Token::Op(BinaryOp::Ge), true),
                ('=', _) => (Token::Assign, false),
                ('<', _) => (Token::Op(BinaryOp::Lt), false),
                ('>', _) => (Token::Op(BinaryOp::Gt), false),
                ('+', _) => (Token::Op(BinaryOp::Add), false),
                ('-', _) => (Token::Op(BinaryOp::Sub), false),
                ('*', _) => (Token::Op(BinaryOp::Mul), false),
                ('/', _) => (Token::Op(BinaryOp::Div), false),
                _ => return Err(format!("unexpected character `{}`", ch)),
            };
            if wide {
                chars.next();
            }
            tokens.push(token);
        }
        after_space = false;
    }

    Ok(tokens)
}

/// Cursor over the tokens of one statement.
pub struct TokenStream<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenStream<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    pub fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn expect_end(&self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("unexpected {}", token.describe())),
        }
    }

    pub fn expect_assign(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Token::Assign) => Ok(()),
            Some(token) => Err(format!("expected `=`, found {}", token.describe())),
            None => Err("expected `=`".to_string()),
        }
    }

    pub fn name(&mut self, what: &str) -> Result<String, String> {
        match self.next() {
            Some(Token::Word(word)) if !is_reserved(word) => Ok(word.clone()),
            Some(token) => Err(format!("expected {}, found {}", what, token.describe())),
            None => Err(format!("expected {}", what)),
        }
    }

    pub fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Literal(value.clone())),
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text.clone()))),
            Some(Token::Word(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                word if is_reserved(word) => Err(format!("unexpected `{}`", word)),
                _ => Ok(Expr::Var(word.clone())),
            },
            Some(token) => Err(format!("expected a value, found {}", token.describe())),
            None => Err("expected a value".to_string()),
        }
    }

    /// Primaries up to the end of the statement.
    pub fn arguments(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        while !self.is_empty() {
            args.push(self.primary()?);
        }
        Ok(args)
    }

    /// `name arg...` after the `call` keyword.
    pub fn call(&mut self) -> Result<CallExpr, String> {
        let name = self.name("a function name")?;
        let args = self.arguments()?;
        Ok(CallExpr { name, args })
    }

    /// A primary, optionally followed by one binary operator and another
    /// primary. With `allow_call` the expression may instead be a call.
    pub fn expression(&mut self, allow_call: bool) -> Result<Expr, String> {
        if let Some(Token::Word(word)) = self.peek() {
            if word == "call" {
                if !allow_call {
                    return Err("`call` is not allowed here".to_string());
                }
                self.next();
                return self.call().map(Expr::Call);
            }
        }

        let left = self.primary()?;
        let Some(Token::Op(op)) = self.peek() else {
            return Ok(left);
        };
        self.next();
        let right = self.primary()?;
        Ok(Expr::Binary(Box::new(left), *op, Box::new(right)))
    }
}

const RESERVED: &[&str] = &[
    "print", "set", "call", "return", "while", "if", "func", "end", "timeout", "poll", "true",
    "false", "null", "rem",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tokenize_operators_and_literals() {
        let tokens = tokenize("x <= -2.5 + \"a \\\"b\\\"\"").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("x".into()),
                Token::Op(BinaryOp::Le),
                Token::Number(json!(-2.5)),
                Token::Op(BinaryOp::Add),
                Token::Str("a \"b\"".into()),
            ]
        );
    }

    #[test]
    fn test_minus_after_operand_is_subtraction() {
        let tokens = tokenize("n-1").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("n".into()),
                Token::Op(BinaryOp::Sub),
                Token::Number(json!(1)),
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(tokenize("print \"oops").is_err());
        assert!(tokenize("x ! y").is_err());
    }

    #[test]
    fn test_expression_forms() {
        let tokens = tokenize("call add 1 x").unwrap();
        let expr = TokenStream::new(&tokens).expression(true).unwrap();
        assert_eq!(
            expr,
            Expr::Call(CallExpr {
                name: "add".into(),
                args: vec![Expr::Literal(json!(1)), Expr::Var("x".into())],
            })
        );
        assert!(TokenStream::new(&tokens).expression(false).is_err());

        let tokens = tokenize("a == null").unwrap();
        let expr = TokenStream::new(&tokens).expression(false).unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                Box::new(Expr::Var("a".into())),
                BinaryOp::Eq,
                Box::new(Expr::Literal(Value::Null))
            )
        );
    }

    #[test]
    fn test_comments() {
        assert!(is_comment("   "));
        assert!(is_comment("# note"));
        assert!(is_comment("REM note"));
        assert!(is_comment("rem"));
        assert!(!is_comment("remember 1"));
        assert!(!is_comment("print 1"));
    }
}
