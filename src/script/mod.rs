//! A reference interpreter for a small line-oriented teaching language.
//!
//! ```text
//! func greet name
//!   print "hello " + name
//! end
//! set n = 0
//! while n < 3
//!   call greet n
//!   set n = n + 1
//! end
//! timeout greet 100 "later"
//! ```
//!
//! Programs are wrapped with [`POLL_LOOP`] so queued callbacks keep being
//! delivered after the user code has finished.

mod interpreter;
mod value;

pub use interpreter::ScriptInterpreter;
pub use value::{display, truthy};

use crate::error::ParseError;
use crate::parser::parse_program;
use crate::source::ProgramText;

/// Generated epilogue that pulls queued callbacks forever.
pub const POLL_LOOP: &str = "while true\n  poll\nend\n";

/// Wrap `user_source` with the poll loop and parse it.
pub fn load(user_source: &str) -> Result<(ScriptInterpreter, ProgramText), ParseError> {
    let text = ProgramText::wrap(user_source, POLL_LOOP);
    let program = parse_program(&text.text)?;
    Ok((ScriptInterpreter::new(program), text))
}

/// Parse `source` as-is, without the poll loop. The run completes when the
/// last statement has executed.
pub fn load_bare(source: &str) -> Result<(ScriptInterpreter, ProgramText), ParseError> {
    let text = ProgramText::new(source.to_string(), 0, source.len());
    let program = parse_program(&text.text)?;
    Ok((ScriptInterpreter::new(program), text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{
        CallbackRef, CallbackRequest, Interpreter, Natives, NodeKind, Value,
    };
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeNatives {
        queue: VecDeque<CallbackRequest>,
        output: Vec<String>,
        returns: Vec<Value>,
        timeouts: Vec<(String, Duration)>,
    }

    impl Natives for FakeNatives {
        fn get_callback(&mut self) -> Option<CallbackRequest> {
            self.queue.pop_front()
        }

        fn set_callback_ret_val(&mut self, value: Value) {
            self.returns.push(value);
        }

        fn set_timeout(&mut self, callback: CallbackRef, delay: Duration, _: Vec<Value>) {
            self.timeouts.push((callback.0, delay));
        }

        fn output(&mut self, text: &str) {
            self.output.push(text.to_string());
        }
    }

    fn run_to_end(source: &str) -> (ScriptInterpreter, FakeNatives) {
        let (mut program, _) = load_bare(source).unwrap();
        let mut natives = FakeNatives::default();
        for _ in 0..10_000 {
            if program.is_complete() {
                break;
            }
            program.step(&mut natives).unwrap();
        }
        assert!(program.is_complete());
        (program, natives)
    }

    #[test]
    fn test_loops_calls_and_returns() {
        let source = "\
func double x
  return x * 2
end
set total = 0
set i = 1
while i <= 3
  set d = call double i
  set total = total + d
  set i = i + 1
end
print \"total \" + total
";
        let (program, natives) = run_to_end(source);
        assert_eq!(natives.output, vec!["total 12"]);
        assert_eq!(program.global("i"), Some(&json!(4)));
        assert_eq!(program.global("d"), Some(&json!(6)));
    }

    #[test]
    fn test_function_locals_do_not_leak() {
        let source = "\
func f a
  set tmp = a
end
set a = 1
call f 5
print a
";
        let (program, natives) = run_to_end(source);
        assert_eq!(natives.output, vec!["1"]);
        assert_eq!(program.global("tmp"), None);
    }

    #[test]
    fn test_if_skips_body_when_false() {
        let (_, natives) = run_to_end("if 1 > 2\n  print \"no\"\nend\nprint \"yes\"\n");
        assert_eq!(natives.output, vec!["yes"]);
    }

    #[test]
    fn test_call_pushes_call_expression_then_block() {
        let (mut program, text) = load_bare("func f\n  print 1\nend\ncall f\n").unwrap();
        let mut natives = FakeNatives::default();
        let lines = text.line_map();

        // Enter the statement on line 4.
        program.step(&mut natives).unwrap();
        assert_eq!(program.stack_depth(), 2);
        assert_eq!(lines.user_line(program.position().unwrap()), Some(4));

        program.step(&mut natives).unwrap();
        let top = program.top_frame().unwrap();
        assert_eq!(top.kind, NodeKind::CallExpression);
        assert!(!program.is_safe_to_continue_unwinding());

        program.step(&mut natives).unwrap();
        assert_eq!(program.top_frame().unwrap().kind, NodeKind::BlockStatement);
        assert_eq!(lines.user_line(program.position().unwrap()), Some(2));
        assert!(program.is_safe_to_continue_unwinding());
    }

    #[test]
    fn test_completed_statement_lingers_one_step() {
        let (mut program, _) = load_bare("print 1\nprint 2\n").unwrap();
        let mut natives = FakeNatives::default();
        program.step(&mut natives).unwrap();
        program.step(&mut natives).unwrap();
        assert_eq!(natives.output, vec!["1"]);
        assert!(program.top_frame().unwrap().done);
        assert!(program.is_safe_to_continue_unwinding());
        program.step(&mut natives).unwrap();
        assert!(!program.top_frame().unwrap().done);
    }

    #[test]
    fn test_poll_loop_delivers_callbacks_and_returns_values() {
        let (mut program, _) = load("func key k\n  return k == \"q\"\nend\n").unwrap();
        let mut natives = FakeNatives::default();
        natives.queue.push_back(CallbackRequest {
            callback: CallbackRef::new("key"),
            arguments: vec![json!("q")],
        });
        for _ in 0..40 {
            program.step(&mut natives).unwrap();
        }
        assert_eq!(natives.returns, vec![json!(true)]);
        assert!(!program.is_complete());
    }

    #[test]
    fn test_timeout_registers_with_natives() {
        let (_, natives) = run_to_end("func f\nend\ntimeout f 250\n");
        assert_eq!(
            natives.timeouts,
            vec![("f".to_string(), Duration::from_millis(250))]
        );
    }

    #[test]
    fn test_runtime_errors_carry_offsets() {
        let source = "print 1\nprint missing\n";
        let (mut program, text) = load_bare(source).unwrap();
        let mut natives = FakeNatives::default();
        let err = loop {
            if let Err(err) = program.step(&mut natives) {
                break err;
            }
        };
        assert_eq!(err.message, "`missing` is not defined");
        assert_eq!(text.line_map().user_line(err.offset.unwrap()), Some(2));
    }

    #[test]
    fn test_arity_and_unknown_function_errors() {
        let (mut program, _) = load_bare("func f a\nend\ncall f\n").unwrap();
        let mut natives = FakeNatives::default();
        let err = (0..10)
            .find_map(|_| program.step(&mut natives).err())
            .unwrap();
        assert!(err.message.contains("expects 1 argument"));

        let (mut program, _) = load_bare("call nope\n").unwrap();
        let err = (0..10)
            .find_map(|_| program.step(&mut natives).err())
            .unwrap();
        assert_eq!(err.message, "`nope` is not a function");
    }

    #[test]
    fn test_runaway_recursion_is_an_error() {
        let (mut program, _) = load_bare("func f\n  call f\nend\ncall f\n").unwrap();
        let mut natives = FakeNatives::default();
        let err = (0..100_000)
            .find_map(|_| program.step(&mut natives).err())
            .unwrap();
        assert_eq!(err.message, "Maximum call stack size exceeded");
    }
}
