//! The contract between the tick scheduler and the interpreter it drives.
//!
//! The scheduler never looks inside interpreter state. It advances the
//! interpreter one node at a time and reads back a small view of the call
//! stack: the source offset of the top node, the stack depth, and what kind
//! of node is on top.

use crate::error::StepError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Values exchanged between the host and interpreted code.
pub type Value = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    CallExpression,
    BlockStatement,
    Other,
}

/// The top of the interpreter's state stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopFrame {
    pub kind: NodeKind,
    /// The node has finished its work and will be popped by the next step.
    pub done: bool,
}

/// Reference to an interpreted function, by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackRef(pub String);

impl CallbackRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A callback handed to interpreted code by `get_callback`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackRequest {
    pub callback: CallbackRef,
    pub arguments: Vec<Value>,
}

/// Native functions visible to interpreted code.
pub trait Natives {
    /// Next queued callback, or `None` when the queue is empty.
    fn get_callback(&mut self) -> Option<CallbackRequest>;

    /// Return value of a callback obtained from `get_callback`.
    fn set_callback_ret_val(&mut self, value: Value);

    /// Queue `callback` to run once `delay` has elapsed.
    fn set_timeout(&mut self, callback: CallbackRef, delay: Duration, arguments: Vec<Value>);

    /// Write a line to the program console.
    fn output(&mut self, text: &str);
}

pub trait Interpreter {
    /// Execute one node.
    fn step(&mut self, natives: &mut dyn Natives) -> Result<(), StepError>;

    /// Source offset of the node on top of the stack.
    fn position(&self) -> Option<usize>;

    fn stack_depth(&self) -> usize;

    fn top_frame(&self) -> Option<TopFrame>;

    /// Whether the next step only finishes bookkeeping for the current
    /// statement (popping completed nodes, entering blocks) rather than
    /// starting new user-visible work.
    fn is_safe_to_continue_unwinding(&self) -> bool;

    /// Nothing is left to execute.
    fn is_complete(&self) -> bool;
}
