use crate::interpreter::{Interpreter, NodeKind, TopFrame};
use crate::source::LineMap;

/// Where the interpreter is, as seen by the debugger for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionCursor {
    /// 1-indexed user line, `None` outside user code.
    pub line: Option<usize>,
    pub depth: usize,
    pub top: Option<TopFrame>,
}

impl ExecutionCursor {
    pub fn capture(program: &dyn Interpreter, lines: &LineMap) -> Self {
        let line = program.position().and_then(|offset| lines.user_line(offset));
        Self::with_line(program, line)
    }

    /// Stack view of `program` attributed to an already known `line`.
    ///
    /// After a step the debugger keeps attributing the new stack to the line
    /// that was executing when the step began.
    pub fn with_line(program: &dyn Interpreter, line: Option<usize>) -> Self {
        Self {
            line,
            depth: program.stack_depth(),
            top: program.top_frame(),
        }
    }

    pub fn in_user_code(&self) -> bool {
        self.line.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.top.is_some_and(|top| top.done)
    }

    pub fn is_call_expression(&self) -> bool {
        self.kind() == Some(NodeKind::CallExpression)
    }

    pub fn is_block(&self) -> bool {
        self.kind() == Some(NodeKind::BlockStatement)
    }

    fn kind(&self) -> Option<NodeKind> {
        self.top.map(|top| top.kind)
    }
}
