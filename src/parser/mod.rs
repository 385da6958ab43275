mod commands;
mod preprocessor;
mod program;
mod types;

pub use commands::{is_comment, tokenize, Token};
pub use preprocessor::{join_continued_lines, preprocess};
pub use program::parse_program;
pub use types::{
    BinaryOp, CallExpr, Expr, Function, JoinedLine, Node, PreprocessResult, Program, Stmt,
};
