use super::value::{binary, display, truthy};
use crate::error::StepError;
use crate::interpreter::{CallbackRef, Interpreter, Natives, NodeKind, TopFrame, Value};
use crate::parser::{CallExpr, Expr, Function, Node, Program, Stmt};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

/// States on the stack before a step is refused.
const MAX_STACK_DEPTH: usize = 3_000;

/// A statement inside some block, kept alive by the block's `Rc`.
#[derive(Debug, Clone)]
struct NodeRef {
    body: Rc<[Node]>,
    index: usize,
}

impl NodeRef {
    fn node(&self) -> &Node {
        &self.body[self.index]
    }
}

#[derive(Debug)]
enum State {
    Block {
        body: Rc<[Node]>,
        next: usize,
        offset: Option<usize>,
    },
    Stmt {
        node: NodeRef,
        awaiting: bool,
        done: bool,
    },
    Loop {
        node: NodeRef,
        done: bool,
    },
    Branch {
        node: NodeRef,
        entered: bool,
        done: bool,
    },
    Call {
        name: String,
        args: Vec<Value>,
        offset: Option<usize>,
        started: bool,
        result: Option<Value>,
    },
    Poll {
        node: NodeRef,
        awaiting: bool,
        done: bool,
    },
}

impl State {
    fn is_done(&self) -> bool {
        match self {
            State::Block { body, next, .. } => *next >= body.len(),
            State::Stmt { done, .. }
            | State::Loop { done, .. }
            | State::Branch { done, .. }
            | State::Poll { done, .. } => *done,
            State::Call { result, .. } => result.is_some(),
        }
    }

    fn position(&self) -> Option<usize> {
        match self {
            State::Block { body, next, offset } => {
                body.get(*next).map(|node| node.offset).or(*offset)
            }
            State::Stmt { node, .. }
            | State::Loop { node, .. }
            | State::Branch { node, .. }
            | State::Poll { node, .. } => Some(node.node().offset),
            State::Call { offset, .. } => *offset,
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            State::Block { .. } => NodeKind::BlockStatement,
            State::Call { .. } => NodeKind::CallExpression,
            _ => NodeKind::Other,
        }
    }
}

/// Small-step interpreter for the line-oriented teaching language.
///
/// Each [`Interpreter::step`] advances exactly one state: entering a
/// statement, evaluating it, pushing a callee, or popping a finished state.
/// Finished states stay on the stack, marked done, for one step so the
/// debugger can observe that a line completed.
pub struct ScriptInterpreter {
    functions: HashMap<String, Rc<Function>>,
    globals: HashMap<String, Value>,
    locals: Vec<HashMap<String, Value>>,
    stack: Vec<State>,
}

impl ScriptInterpreter {
    pub fn new(program: Program) -> Self {
        Self {
            functions: program.functions,
            globals: HashMap::new(),
            locals: Vec::new(),
            stack: vec![State::Block {
                body: program.body,
                next: 0,
                offset: None,
            }],
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn push(&mut self, state: State) -> Result<(), StepError> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(StepError::new(
                "Maximum call stack size exceeded",
                state.position(),
            ));
        }
        self.stack.push(state);
        Ok(())
    }

    /* ===================== Variables ===================== */

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals
            .last()
            .and_then(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn assign(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.locals.last_mut() {
            if scope.contains_key(name) || !self.globals.contains_key(name) {
                scope.insert(name.to_string(), value);
                return;
            }
        }
        self.globals.insert(name.to_string(), value);
    }

    fn eval(&self, expr: &Expr, offset: usize) -> Result<Value, StepError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name).cloned().ok_or_else(|| {
                StepError::new(format!("`{}` is not defined", name), Some(offset))
            }),
            Expr::Binary(left, op, right) => {
                let left = self.eval(left, offset)?;
                let right = self.eval(right, offset)?;
                binary(*op, &left, &right).map_err(|message| StepError::new(message, Some(offset)))
            }
            Expr::Call(_) => Err(StepError::new("unexpected call", Some(offset))),
        }
    }

    fn eval_all(&self, exprs: &[Expr], offset: usize) -> Result<Vec<Value>, StepError> {
        exprs.iter().map(|expr| self.eval(expr, offset)).collect()
    }

    /* ===================== Stepping ===================== */

    /// Push the state for a statement about to run.
    fn enter(&mut self, node: NodeRef) -> Result<(), StepError> {
        let state = match node.node().stmt {
            Stmt::While(..) => State::Loop {
                node: node.clone(),
                done: false,
            },
            Stmt::If(..) => State::Branch {
                node: node.clone(),
                entered: false,
                done: false,
            },
            Stmt::Poll => State::Poll {
                node: node.clone(),
                awaiting: false,
                done: false,
            },
            _ => State::Stmt {
                node: node.clone(),
                awaiting: false,
                done: false,
            },
        };
        self.push(state)
    }

    fn push_call(&mut self, call: &CallExpr, offset: usize) -> Result<(), StepError> {
        let args = self.eval_all(&call.args, offset)?;
        self.push(State::Call {
            name: call.name.clone(),
            args,
            offset: Some(offset),
            started: false,
            result: None,
        })
    }

    fn run_statement(&mut self, node: NodeRef, natives: &mut dyn Natives) -> Result<(), StepError> {
        let offset = node.node().offset;
        let call = match &node.node().stmt {
            Stmt::Call(call) => Some(call),
            Stmt::Print(Expr::Call(call))
            | Stmt::Set(_, Expr::Call(call))
            | Stmt::Return(Some(Expr::Call(call))) => Some(call),
            _ => None,
        };
        if let Some(call) = call.cloned() {
            self.push(State::Stmt {
                node,
                awaiting: true,
                done: false,
            })?;
            return self.push_call(&call, offset);
        }

        let value = match &node.node().stmt {
            Stmt::Print(expr) | Stmt::Set(_, expr) | Stmt::Return(Some(expr)) => {
                self.eval(expr, offset)?
            }
            Stmt::Timeout {
                callback,
                delay,
                args,
            } => {
                if !self.functions.contains_key(callback) {
                    return Err(StepError::new(
                        format!("`{}` is not a function", callback),
                        Some(offset),
                    ));
                }
                let delay = self.eval(delay, offset)?;
                let millis = delay.as_f64().filter(|ms| *ms >= 0.0).ok_or_else(|| {
                    StepError::new("timeout delay must be a non-negative number", Some(offset))
                })?;
                let delay = Duration::try_from_secs_f64(millis / 1000.0).map_err(|_| {
                    StepError::new("timeout delay is too large", Some(offset))
                })?;
                let args = self.eval_all(args, offset)?;
                natives.set_timeout(CallbackRef::new(callback.clone()), delay, args);
                Value::Null
            }
            _ => Value::Null,
        };
        self.complete_statement(node, value, natives)
    }

    /// Apply a statement's effect with its evaluated value.
    fn complete_statement(
        &mut self,
        node: NodeRef,
        value: Value,
        natives: &mut dyn Natives,
    ) -> Result<(), StepError> {
        match &node.node().stmt {
            Stmt::Print(_) => natives.output(&display(&value)),
            Stmt::Set(name, _) => {
                let name = name.clone();
                self.assign(&name, value);
            }
            Stmt::Return(_) => return self.return_from_call(value, node.node().offset),
            _ => {}
        }
        self.push(State::Stmt {
            node,
            awaiting: false,
            done: true,
        })
    }

    /// Pop states up to the enclosing call and hand it `value`.
    fn return_from_call(&mut self, value: Value, offset: usize) -> Result<(), StepError> {
        while let Some(state) = self.stack.last_mut() {
            if let State::Call { result, .. } = state {
                *result = Some(value);
                self.locals.pop();
                return Ok(());
            }
            self.stack.pop();
        }
        Err(StepError::new("`return` outside of a function", Some(offset)))
    }

    fn start_call(
        &mut self,
        name: String,
        args: Vec<Value>,
        offset: Option<usize>,
    ) -> Result<(), StepError> {
        let function = self.functions.get(&name).cloned().ok_or_else(|| {
            StepError::new(format!("`{}` is not a function", name), offset)
        })?;
        if function.params.len() != args.len() {
            return Err(StepError::new(
                format!(
                    "`{}` expects {} argument(s) but got {}",
                    name,
                    function.params.len(),
                    args.len()
                ),
                offset,
            ));
        }
        trace!(function = %name, depth = self.stack.len(), "call");

        self.push(State::Call {
            name,
            args: Vec::new(),
            offset,
            started: true,
            result: None,
        })?;
        self.locals
            .push(function.params.iter().cloned().zip(args).collect());
        self.push(State::Block {
            body: function.body.clone(),
            next: 0,
            offset: Some(function.offset),
        })
    }

    /// A finished state was popped; let its parent react.
    fn finish(&mut self, finished: State, natives: &mut dyn Natives) -> Result<(), StepError> {
        let returned = match finished {
            State::Call { result, .. } => result,
            State::Block { .. } => {
                // A function body ran off its end.
                if let Some(State::Call {
                    started: true,
                    result,
                    ..
                }) = self.stack.last_mut()
                {
                    if result.is_none() {
                        *result = Some(Value::Null);
                        self.locals.pop();
                    }
                }
                return Ok(());
            }
            _ => return Ok(()),
        };
        let value = returned.unwrap_or(Value::Null);

        match self.stack.pop() {
            Some(State::Stmt {
                node,
                awaiting: true,
                ..
            }) => self.complete_statement(node, value, natives),
            Some(State::Poll {
                node,
                awaiting: true,
                ..
            }) => {
                natives.set_callback_ret_val(value);
                self.push(State::Poll {
                    node,
                    awaiting: false,
                    done: true,
                })
            }
            Some(other) => {
                self.stack.push(other);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn advance(&mut self, state: State, natives: &mut dyn Natives) -> Result<(), StepError> {
        match state {
            State::Block { body, next, offset } => {
                let child = NodeRef {
                    body: body.clone(),
                    index: next,
                };
                self.stack.push(State::Block {
                    body,
                    next: next + 1,
                    offset,
                });
                self.enter(child)
            }
            State::Stmt { node, .. } => self.run_statement(node, natives),
            State::Loop { node, .. } => {
                let Stmt::While(cond, body) = &node.node().stmt else {
                    return Ok(());
                };
                let offset = node.node().offset;
                let go = truthy(&self.eval(cond, offset)?);
                let body = body.clone();
                self.stack.push(State::Loop { node, done: !go });
                if go {
                    self.push(State::Block {
                        body,
                        next: 0,
                        offset: Some(offset),
                    })?;
                }
                Ok(())
            }
            State::Branch { node, entered, .. } => {
                let Stmt::If(cond, body) = &node.node().stmt else {
                    return Ok(());
                };
                if entered {
                    self.stack.push(State::Branch {
                        node,
                        entered,
                        done: true,
                    });
                    return Ok(());
                }
                let offset = node.node().offset;
                let go = truthy(&self.eval(cond, offset)?);
                let body = body.clone();
                self.stack.push(State::Branch {
                    node,
                    entered: go,
                    done: !go,
                });
                if go {
                    self.push(State::Block {
                        body,
                        next: 0,
                        offset: Some(offset),
                    })?;
                }
                Ok(())
            }
            State::Call {
                name,
                args,
                offset,
                started: false,
                ..
            } => self.start_call(name, args, offset),
            State::Call {
                name,
                offset,
                ..
            } => {
                // A started call only surfaces once its body has finished.
                self.locals.pop();
                self.stack.push(State::Call {
                    name,
                    args: Vec::new(),
                    offset,
                    started: true,
                    result: Some(Value::Null),
                });
                Ok(())
            }
            State::Poll { node, .. } => match natives.get_callback() {
                None => {
                    self.stack.push(State::Poll {
                        node,
                        awaiting: false,
                        done: true,
                    });
                    Ok(())
                }
                Some(request) => {
                    self.stack.push(State::Poll {
                        node,
                        awaiting: true,
                        done: false,
                    });
                    self.push(State::Call {
                        name: request.callback.0,
                        args: request.arguments,
                        offset: None,
                        started: false,
                        result: None,
                    })
                }
            },
        }
    }
}

impl Interpreter for ScriptInterpreter {
    fn step(&mut self, natives: &mut dyn Natives) -> Result<(), StepError> {
        let Some(state) = self.stack.pop() else {
            return Ok(());
        };
        if state.is_done() {
            return self.finish(state, natives);
        }
        self.advance(state, natives)
    }

    fn position(&self) -> Option<usize> {
        self.stack.last().and_then(State::position)
    }

    fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn top_frame(&self) -> Option<TopFrame> {
        self.stack.last().map(|state| TopFrame {
            kind: state.kind(),
            done: state.is_done(),
        })
    }

    fn is_safe_to_continue_unwinding(&self) -> bool {
        match self.stack.last() {
            None => true,
            Some(state) => state.is_done() || matches!(state, State::Block { .. }),
        }
    }

    fn is_complete(&self) -> bool {
        self.stack.is_empty()
    }
}
