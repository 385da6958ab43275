//! The stepping state machine.
//!
//! Every method here is a pure transition over debugger state and the
//! [`ExecutionCursor`] values handed in by the scheduler. The scheduler owns
//! the interpreter and the host; this type only decides.
//!
//! A burst (the stepping loop inside one tick) calls, per step:
//!
//! 1. [`StepController::should_stop`] at the top of the loop,
//! 2. [`StepController::arrive`] to detect a new breakpoint,
//! 3. [`StepController::refresh_stop_point`],
//! 4. the interpreter step itself,
//! 5. [`StepController::observe_step`], [`StepController::unwind`] and
//!    [`StepController::complete_step`] with the stack after the step.

use super::cursor::ExecutionCursor;
use super::history::CallDepthHistory;
use super::stepping::{StepMode, StopReason};
use serde::Serialize;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Running,
    Paused(StepMode),
}

/// Whether the burst keeps stepping past a reached stop to find a clean
/// statement boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unwinding {
    #[default]
    NotUnwinding,
    Unwinding,
}

impl Unwinding {
    fn when(safe: bool) -> Self {
        if safe {
            Unwinding::Unwinding
        } else {
            Unwinding::NotUnwinding
        }
    }

    pub fn is_active(self) -> bool {
        self == Unwinding::Unwinding
    }
}

/// UI-facing view of the debugger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseState {
    pub running: bool,
    pub paused: bool,
    pub step_mode: StepMode,
    pub stopped_at_line: Option<usize>,
    pub stopped_at_depth: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StopPoint {
    line: usize,
    depth: usize,
}

/// Flags local to one burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Burst {
    pub unwinding: Unwinding,
    pub reached_break: bool,
    pub done_user_line: bool,
}

/// What the callback bridge reported during the burst so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeSignals {
    pub seen_empty_queue: bool,
    pub seen_callback_return: bool,
    pub run_until_callback_return: bool,
}

#[derive(Debug, Clone)]
pub struct StepController {
    state: ExecState,
    stop_point: Option<StopPoint>,
    history: CallDepthHistory,
    first_call_depth: Option<usize>,
    step_out_to_depth: Option<usize>,
    entry_pending: bool,
    stop_reason: Option<StopReason>,
}

impl Default for StepController {
    fn default() -> Self {
        Self::new()
    }
}

impl StepController {
    pub fn new() -> Self {
        Self {
            state: ExecState::Running,
            stop_point: None,
            history: CallDepthHistory::new(),
            first_call_depth: None,
            step_out_to_depth: None,
            entry_pending: false,
            stop_reason: None,
        }
    }

    /// Fresh controller for a new run. With `pause_on_entry` the run steps
    /// in until the first user line and stops there.
    pub fn start(pause_on_entry: bool) -> Self {
        let mut controller = Self::new();
        if pause_on_entry {
            controller.state = ExecState::Paused(StepMode::StepIn);
            controller.entry_pending = true;
        }
        controller
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, ExecState::Paused(_))
    }

    pub fn mode(&self) -> StepMode {
        match self.state {
            ExecState::Running => StepMode::Run,
            ExecState::Paused(mode) => mode,
        }
    }

    /// Paused with no step operation pending: ticks do not step.
    pub fn is_at_rest(&self) -> bool {
        self.state == ExecState::Paused(StepMode::Run)
    }

    pub fn history(&self) -> &CallDepthHistory {
        &self.history
    }

    pub fn pause_state(&self, running: bool) -> PauseState {
        PauseState {
            running,
            paused: running && self.is_paused(),
            step_mode: self.mode(),
            stopped_at_line: self.stop_point.map(|p| p.line),
            stopped_at_depth: self.stop_point.map(|p| p.depth),
        }
    }

    /* ===================== Commands ===================== */

    /// Come to rest, abandoning any step operation in progress. Returns
    /// false when already at rest.
    pub fn pause(&mut self) -> bool {
        if self.is_at_rest() {
            return false;
        }
        self.state = ExecState::Paused(StepMode::Run);
        self.entry_pending = false;
        self.clear_step_operation();
        self.stop_reason = Some(StopReason::Pause);
        true
    }

    /// Leave the paused state. The recorded stop point is kept so the
    /// breakpoint we are sitting on does not fire again immediately.
    pub fn resume(&mut self) {
        self.begin_operation(ExecState::Running);
    }

    /// Begin a step operation. Stepping always happens in the paused state.
    pub fn step(&mut self, mode: StepMode) {
        if mode == StepMode::Run {
            self.resume();
            return;
        }
        self.begin_operation(ExecState::Paused(mode));
    }

    pub fn take_stop_reason(&mut self) -> Option<StopReason> {
        self.stop_reason.take()
    }

    fn clear_step_operation(&mut self) {
        self.first_call_depth = None;
        self.step_out_to_depth = None;
    }

    fn begin_operation(&mut self, state: ExecState) {
        self.state = state;
        self.clear_step_operation();
        self.stop_reason = None;
    }

    /* ===================== Tick ===================== */

    /// Called once per tick before stepping. Returns whether to step.
    pub fn begin_tick(&mut self) -> bool {
        match self.state {
            ExecState::Paused(StepMode::Run) => false,
            ExecState::Paused(StepMode::StepOut) => {
                if self.step_out_to_depth.is_none() {
                    let target = self.history.step_out_target();
                    debug!(target, "step out target depth");
                    self.step_out_to_depth = Some(target);
                }
                true
            }
            _ => true,
        }
    }

    /// Whether the burst must end before taking another step.
    pub fn should_stop(&self, burst: &Burst, signals: &BridgeSignals, at_max_speed: bool) -> bool {
        let unwinding = burst.unwinding.is_active();
        (burst.reached_break && !unwinding)
            || (burst.done_user_line && !unwinding && !at_max_speed)
            || signals.seen_empty_queue
            || (signals.run_until_callback_return && signals.seen_callback_return)
    }

    /* ===================== Per step ===================== */

    /// Detect arrival at a new breakpoint (or the entry stop) before a step.
    /// Returns true when the burst should skip the step and re-check its
    /// stop condition.
    pub fn arrive(
        &mut self,
        burst: &mut Burst,
        cursor: &ExecutionCursor,
        is_breakpoint: bool,
        safe_to_unwind: bool,
    ) -> bool {
        let Some(line) = cursor.line else {
            return false;
        };
        if burst.unwinding.is_active() {
            return false;
        }
        let left_previous_stop = self.stop_point.map(|p| p.line) != Some(line);
        if !(self.entry_pending || (is_breakpoint && left_previous_stop)) {
            return false;
        }

        let reason = if self.entry_pending {
            StopReason::Entry
        } else {
            StopReason::Breakpoint
        };
        debug!(line, depth = cursor.depth, ?reason, "arrived at stop");

        self.entry_pending = false;
        self.state = ExecState::Paused(StepMode::Run);
        self.clear_step_operation();
        self.stop_point = Some(StopPoint {
            line,
            depth: cursor.depth,
        });
        self.stop_reason = Some(reason);
        burst.reached_break = true;
        burst.unwinding = Unwinding::when(safe_to_unwind);
        true
    }

    /// Forget the recorded stop once execution has left its line without
    /// going deeper; keep it current while unwinding.
    pub fn refresh_stop_point(&mut self, burst: &Burst, cursor: &ExecutionCursor) {
        let Some(line) = cursor.line else {
            return;
        };
        if let Some(point) = self.stop_point {
            if point.line != line && cursor.depth <= point.depth {
                trace!(line = point.line, "left recorded stop point");
                self.stop_point = None;
            }
        }
        if burst.unwinding.is_active() {
            self.stop_point = Some(StopPoint {
                line,
                depth: cursor.depth,
            });
        }
    }

    /// Fold the stack observed after a step into the burst. `after` carries
    /// the line that was executing when the step began.
    pub fn observe_step(&mut self, burst: &mut Burst, after: &ExecutionCursor) {
        let in_user_code = after.in_user_code();
        if in_user_code && after.is_done() {
            burst.done_user_line = true;
        }

        let call_here = in_user_code && after.is_call_expression();
        self.history.record(after.depth, call_here);

        if !self.is_paused() {
            return;
        }

        if call_here && self.first_call_depth.is_none() {
            self.first_call_depth = Some(after.depth);
        }

        // Entering a block counts as finishing a line while paused, otherwise
        // stepping would stall on loop headers.
        if in_user_code && after.is_block() {
            burst.done_user_line = true;
        }

        if !burst.done_user_line
            && in_user_code
            && self.mode() == StepMode::StepIn
            && self.first_call_depth.is_some_and(|first| after.depth > first)
        {
            burst.reached_break = true;
        }
    }

    /// Continue unwinding while the interpreter says the next step is safe.
    /// Returns true when unwinding just ended and the caller must look up the
    /// line now about to execute and pass it to [`Self::reselected`].
    pub fn unwind(&mut self, burst: &mut Burst, safe_to_unwind: bool) -> bool {
        if !self.is_paused() || !(burst.done_user_line || burst.reached_break) {
            return false;
        }
        let was_unwinding = burst.unwinding.is_active();
        burst.unwinding = Unwinding::when(safe_to_unwind);
        was_unwinding && !burst.unwinding.is_active()
    }

    /// Unwinding never ends outside user code.
    pub fn reselected(&mut self, burst: &mut Burst, line: Option<usize>) {
        if line.is_none() {
            burst.unwinding = Unwinding::Unwinding;
        }
    }

    /// Finish the step operation if its target has been reached. Returns
    /// true when the debugger came to rest.
    pub fn complete_step(&mut self, burst: &Burst, line: Option<usize>, depth: usize) -> bool {
        if !self.is_paused()
            || !(burst.reached_break || burst.done_user_line)
            || burst.unwinding.is_active()
        {
            return false;
        }

        match self.mode() {
            StepMode::StepOut if depth > self.step_out_to_depth.unwrap_or(0) => false,
            StepMode::StepOver if self.first_call_depth.is_some_and(|first| depth > first) => {
                false
            }
            _ => {
                self.state = ExecState::Paused(StepMode::Run);
                if let Some(line) = line {
                    self.stop_point = Some(StopPoint { line, depth });
                }
                self.clear_step_operation();
                self.stop_reason.get_or_insert(StopReason::Step);
                debug!(?line, depth, "step complete");
                true
            }
        }
    }
}
