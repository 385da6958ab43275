use super::scheduler::RunOutcome;
use crate::debugger::{PauseState, StopReason};
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// The scheduler's only way to talk to the outside world.
///
/// Everything the user sees goes through here: console lines, the selected
/// line, error annotations and pause transitions.
pub trait Host {
    /// One line of program console output.
    fn output(&mut self, text: &str);

    /// Highlight the line currently executing.
    fn select_line(&mut self, _line: usize) {}

    fn annotate_error(&mut self, _line: Option<usize>, _message: &str) {}

    fn stopped(&mut self, _reason: StopReason, _state: &PauseState) {}

    fn pause_changed(&mut self, _state: &PauseState) {}

    fn finished(&mut self, _outcome: &RunOutcome) {}
}

/// Program output on stdout, debugger chatter on stderr.
pub struct ConsoleHost {
    source: Vec<String>,
}

impl ConsoleHost {
    pub fn new(user_source: &str) -> Self {
        Self {
            source: user_source.lines().map(str::to_string).collect(),
        }
    }
}

impl Host for ConsoleHost {
    fn output(&mut self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", text);
        let _ = stdout.flush();
    }

    fn annotate_error(&mut self, line: Option<usize>, message: &str) {
        match line {
            Some(line) => eprintln!("❌ Error on line {}: {}", line, message),
            None => eprintln!("❌ Error: {}", message),
        }
    }

    fn stopped(&mut self, reason: StopReason, state: &PauseState) {
        let Some(line) = state.stopped_at_line else {
            eprintln!("\n⏸  Paused ({:?})", reason);
            return;
        };
        eprintln!(
            "\n🔍 Stopped at line {} ({:?}, depth {})",
            line,
            reason,
            state.stopped_at_depth.unwrap_or(0)
        );
        if let Some(text) = line.checked_sub(1).and_then(|i| self.source.get(i)) {
            eprintln!("    {}", text);
        }
    }

    fn finished(&mut self, outcome: &RunOutcome) {
        eprintln!("\n✅ Program finished: {}", outcome);
    }
}

/// Everything a [`RecordingHost`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Output(String),
    Select(usize),
    Annotate(Option<usize>, String),
    Stopped(StopReason, PauseState),
    PauseChanged(PauseState),
    Finished(RunOutcome),
}

/// Host that records every call. Clones share one log, so a test can keep a
/// handle after giving the host to a scheduler.
#[derive(Debug, Clone, Default)]
pub struct RecordingHost {
    events: Rc<RefCell<Vec<HostEvent>>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.borrow().clone()
    }

    pub fn output_lines(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                HostEvent::Output(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Lines at which execution came to rest, with the reason.
    pub fn stops(&self) -> Vec<(StopReason, Option<usize>)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                HostEvent::Stopped(reason, state) => Some((*reason, state.stopped_at_line)),
                _ => None,
            })
            .collect()
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.events.borrow().iter().rev().find_map(|event| match event {
            HostEvent::Finished(outcome) => Some(outcome.clone()),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn push(&self, event: HostEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl Host for RecordingHost {
    fn output(&mut self, text: &str) {
        self.push(HostEvent::Output(text.to_string()));
    }

    fn select_line(&mut self, line: usize) {
        self.push(HostEvent::Select(line));
    }

    fn annotate_error(&mut self, line: Option<usize>, message: &str) {
        self.push(HostEvent::Annotate(line, message.to_string()));
    }

    fn stopped(&mut self, reason: StopReason, state: &PauseState) {
        self.push(HostEvent::Stopped(reason, state.clone()));
    }

    fn pause_changed(&mut self, state: &PauseState) {
        self.push(HostEvent::PauseChanged(state.clone()));
    }

    fn finished(&mut self, outcome: &RunOutcome) {
        self.push(HostEvent::Finished(outcome.clone()));
    }
}
