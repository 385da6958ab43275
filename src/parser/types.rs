use crate::interpreter::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// Physical lines joined by trailing `\` continuations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedLine {
    pub text: String,
    /// Byte offset of the first non-blank character in the program text.
    pub offset: usize,
    /// 0-indexed physical lines covered.
    pub phys_start: usize,
    pub phys_end: usize,
}

/// Output of preprocessing: logical lines + mapping back to physical indices.
#[derive(Debug, Clone)]
pub struct PreprocessResult {
    pub logical: Vec<JoinedLine>,
    pub phys_to_logical: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    /// Only ever the whole right-hand side of a statement.
    Call(CallExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Print(Expr),
    Set(String, Expr),
    Call(CallExpr),
    Return(Option<Expr>),
    While(Expr, Rc<[Node]>),
    If(Expr, Rc<[Node]>),
    Timeout {
        callback: String,
        delay: Expr,
        args: Vec<Expr>,
    },
    Poll,
}

/// A statement and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub stmt: Stmt,
    pub offset: usize,
    /// 1-indexed physical line of the program text.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Rc<[Node]>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Rc<[Node]>,
    pub functions: HashMap<String, Rc<Function>>,
}
