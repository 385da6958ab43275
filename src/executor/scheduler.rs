//! The tick driver.
//!
//! A [`TickScheduler`] owns the live program, its event queue and the
//! stepping controller. The host fires ticks (see [`PendingTick`]); each tick
//! runs one bounded burst of interpreter steps and schedules the next tick
//! before stepping.

use super::bridge::{BridgeRequest, CallbackBridge, CallbackResponse};
use super::clock::{Clock, PendingTick};
use super::host::Host;
use super::queue::{EventEntry, EventQueue, Timers};
use crate::config::SchedulerConfig;
use crate::debugger::{
    BreakpointIndex, Burst, DebugCommand, ExecutionCursor, PauseState, StepController, StepMode,
};
use crate::error::StepError;
use crate::interpreter::{CallbackRef, Interpreter, Value};
use crate::source::LineMap;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RunOutcome {
    Completed,
    Failed {
        message: String,
        line: Option<usize>,
    },
    TimedOut {
        ticks: u64,
    },
    Stopped,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Failed {
                message,
                line: Some(line),
            } => write!(f, "failed on line {}: {}", line, message),
            RunOutcome::Failed { message, line: None } => write!(f, "failed: {}", message),
            RunOutcome::TimedOut { ticks } => write!(f, "timed out after {} ticks", ticks),
            RunOutcome::Stopped => write!(f, "stopped"),
        }
    }
}

/// What a finish predicate sees after each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    pub ticks: u64,
    /// The last burst found the queue empty and no timer is pending.
    pub idle: bool,
    pub queue_len: usize,
    pub pending_timers: usize,
    /// At rest. A pending step operation does not count, so stepping past
    /// the last user line still lets an idle run complete.
    pub paused: bool,
}

/// Longest a front end sleeps waiting on a timer before ticking again.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(60);

pub type FinishPredicate = Box<dyn FnMut(&RunStatus) -> Option<RunOutcome>>;

/// Complete the run once it has nothing left to do.
pub fn finish_when_idle() -> FinishPredicate {
    Box::new(|status| (status.idle && !status.paused).then_some(RunOutcome::Completed))
}

struct Run {
    program: Box<dyn Interpreter>,
    lines: LineMap,
    queue: EventQueue,
    timers: Timers,
    controller: StepController,
    response: CallbackResponse,
    tick_count: u64,
    last_user_line: Option<usize>,
    last_selected: Option<usize>,
}

struct StepFailure {
    error: StepError,
    line: Option<usize>,
}

#[derive(Debug, Default)]
struct BurstReport {
    steps: usize,
    reached_break: bool,
    exhausted: bool,
}

pub struct TickScheduler {
    config: SchedulerConfig,
    clock: Clock,
    host: Box<dyn Host>,
    breakpoints: BreakpointIndex,
    run: Option<Run>,
    run_id: u64,
    pending: Option<PendingTick>,
    outcome: Option<RunOutcome>,
    finish: Option<FinishPredicate>,
    reported: PauseState,
}

impl TickScheduler {
    pub fn new(config: SchedulerConfig, host: impl Host + 'static) -> Self {
        let clock = Clock::new(config.speed, config.max_tick_length_ms);
        Self {
            config,
            clock,
            host: Box::new(host),
            breakpoints: BreakpointIndex::new(),
            run: None,
            run_id: 0,
            pending: None,
            outcome: None,
            finish: None,
            reported: PauseState::default(),
        }
    }

    /// Install the caller's finish predicate, checked after every tick.
    pub fn with_finish(mut self, predicate: FinishPredicate) -> Self {
        self.finish = Some(predicate);
        self
    }

    /* ===================== Lifecycle ===================== */

    /// Begin a new run. Any previous run is stopped first and its pending
    /// tick becomes stale.
    pub fn start(&mut self, program: Box<dyn Interpreter>, lines: LineMap) {
        self.stop();
        self.run_id += 1;
        self.outcome = None;
        self.run = Some(Run {
            program,
            lines,
            queue: EventQueue::new(),
            timers: Timers::new(),
            controller: StepController::start(self.config.pause_on_entry),
            response: CallbackResponse::default(),
            tick_count: 0,
            last_user_line: None,
            last_selected: None,
        });
        info!(
            run = self.run_id,
            pause_on_entry = self.config.pause_on_entry,
            "run started"
        );
        self.report_pause_state();

        if self.config.pause_on_entry {
            self.pending = Some(self.clock.schedule_next_tick(self.run_id));
        } else {
            self.on_tick(PendingTick {
                run: self.run_id,
                delay: Duration::ZERO,
            });
        }
    }

    /// End the current run, reporting [`RunOutcome::Stopped`]. Breakpoints
    /// are kept for the next run.
    pub fn stop(&mut self) {
        if self.run.is_some() {
            self.finish_run(RunOutcome::Stopped);
        }
    }

    /// Stop and forget everything, including breakpoints.
    pub fn reset(&mut self) {
        self.stop();
        self.breakpoints.clear();
        self.outcome = None;
        self.pending = None;
        debug!("scheduler reset");
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn tick_count(&self) -> u64 {
        self.run.as_ref().map_or(0, |run| run.tick_count)
    }

    pub fn queue_len(&self) -> usize {
        self.run.as_ref().map_or(0, |run| run.queue.len())
    }

    pub fn pending_tick(&self) -> Option<PendingTick> {
        self.pending
    }

    /// Hand the pending tick to the host's timer.
    pub fn take_pending_tick(&mut self) -> Option<PendingTick> {
        self.pending.take()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn breakpoints(&self) -> &BreakpointIndex {
        &self.breakpoints
    }

    pub fn pause_state(&self) -> PauseState {
        self.run
            .as_ref()
            .map(|run| run.controller.pause_state(true))
            .unwrap_or_default()
    }

    /// Paused with no step operation in progress: ticks will not step.
    pub fn is_at_rest(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.controller.is_at_rest())
    }

    /// How long until the next timer is due, when the program has drained its
    /// queue and is only waiting on timers.
    pub fn idle_wait(&self) -> Option<Duration> {
        let run = self.run.as_ref()?;
        if !run.response.seen_empty_get_callback || !run.queue.is_empty() {
            return None;
        }
        run.timers
            .next_due_in(Instant::now())
            .map(|wait| wait.min(MAX_IDLE_WAIT))
    }

    /// Last user line seen executing in the current run.
    pub fn current_line(&self) -> Option<usize> {
        let run = self.run.as_ref()?;
        run.controller
            .pause_state(true)
            .stopped_at_line
            .or(run.last_user_line)
    }

    /* ===================== Ticks ===================== */

    pub fn on_tick(&mut self, tick: PendingTick) {
        if tick.run != self.run_id || self.run.is_none() {
            trace!(tick = tick.run, current = self.run_id, "stale tick ignored");
            return;
        }

        // Reschedule before stepping so the host always has the next tick.
        self.pending = Some(self.clock.schedule_next_tick(self.run_id));

        let at_max_speed = self.clock.is_max_speed();
        let request = BridgeRequest {
            run_until_callback_return: false,
            at_max_speed,
            max_marshal_depth: self.config.max_marshal_depth,
            now: Instant::now(),
        };
        let budget = self.config.tick_budget;

        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.tick_count += 1;

        if run.controller.begin_tick() {
            let result = execute_burst(run, &self.breakpoints, self.host.as_mut(), request, budget);
            match result {
                Ok(report) => {
                    trace!(
                        tick = run.tick_count,
                        steps = report.steps,
                        exhausted = report.exhausted,
                        "burst finished"
                    );
                    if report.reached_break && at_max_speed {
                        select_current_line(run, self.host.as_mut(), true);
                    }
                }
                Err(failure) => {
                    self.fail(failure);
                    return;
                }
            }
        }

        run.timers.release_due(Instant::now(), &mut run.queue);
        self.report_stop();
        self.check_finished();
    }

    /// Deliver `callback` and run until it returns, for native handlers
    /// that need its return value. Returns `None` when no run is active, the
    /// run is paused, or the callback did not return within the budget.
    pub fn dispatch_sync(&mut self, callback: CallbackRef, arguments: Vec<Value>) -> Option<Value> {
        let request = BridgeRequest {
            run_until_callback_return: true,
            at_max_speed: self.clock.is_max_speed(),
            max_marshal_depth: self.config.max_marshal_depth,
            now: Instant::now(),
        };
        let budget = self.config.tick_budget;
        let run = self.run.as_mut()?;
        debug!(callback = callback.name(), "synchronous dispatch");
        run.queue.push(EventEntry::new(callback, arguments));
        if run.controller.is_paused() {
            return None;
        }

        run.response.last_ret_val = None;
        match execute_burst(run, &self.breakpoints, self.host.as_mut(), request, budget) {
            Ok(_) => {
                let value = run.response.last_ret_val.take();
                self.report_stop();
                value
            }
            Err(failure) => {
                self.fail(failure);
                None
            }
        }
    }

    fn check_finished(&mut self) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        if run.program.is_complete() {
            self.finish_run(RunOutcome::Completed);
            return;
        }
        if let Some(max) = self.config.max_ticks {
            if run.tick_count >= max {
                let ticks = run.tick_count;
                self.finish_run(RunOutcome::TimedOut { ticks });
                return;
            }
        }
        let status = RunStatus {
            ticks: run.tick_count,
            idle: run.response.seen_empty_get_callback
                && run.queue.is_empty()
                && run.timers.is_empty(),
            queue_len: run.queue.len(),
            pending_timers: run.timers.len(),
            paused: run.controller.is_at_rest(),
        };
        if let Some(outcome) = self.finish.as_mut().and_then(|finish| finish(&status)) {
            self.finish_run(outcome);
        }
    }

    fn fail(&mut self, failure: StepFailure) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        let line = failure
            .error
            .offset
            .and_then(|offset| run.lines.user_line(offset))
            .or(failure.line)
            .or(run.last_user_line);
        let message = failure.error.message;
        error!(?line, %message, "step failed");

        match line {
            Some(line) => self.host.output(&format!("ERROR: Line {}: {}", line, message)),
            None => self.host.output(&format!("ERROR: {}", message)),
        }
        self.host.annotate_error(line, &message);
        self.finish_run(RunOutcome::Failed { message, line });
    }

    fn finish_run(&mut self, outcome: RunOutcome) {
        if self.run.take().is_none() {
            return;
        }
        self.pending = None;
        info!(run = self.run_id, %outcome, "run finished");
        self.host.finished(&outcome);
        self.outcome = Some(outcome);
        self.report_pause_state();
    }

    fn report_stop(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if let Some(reason) = run.controller.take_stop_reason() {
            let state = run.controller.pause_state(true);
            info!(?reason, line = ?state.stopped_at_line, "paused");
            self.host.stopped(reason, &state);
        }
        self.report_pause_state();
    }

    fn report_pause_state(&mut self) {
        let state = self.pause_state();
        if state != self.reported {
            self.host.pause_changed(&state);
            self.reported = state;
        }
    }

    /* ===================== Debugger commands ===================== */

    pub fn apply(&mut self, command: DebugCommand) {
        match command {
            DebugCommand::Pause => self.pause(),
            DebugCommand::Resume => self.resume(),
            DebugCommand::StepIn => self.step_in(),
            DebugCommand::StepOver => self.step_over(),
            DebugCommand::StepOut => self.step_out(),
            DebugCommand::ToggleBreakpoint(line) => {
                self.toggle_breakpoint(line);
            }
            DebugCommand::SetBreakpoints(lines) => self.set_breakpoints(lines),
            DebugCommand::SetSpeed(speed) => self.set_speed(speed),
            DebugCommand::Stop => self.stop(),
        }
    }

    pub fn pause(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.controller.pause() {
            self.report_stop();
        }
    }

    pub fn resume(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.controller.is_paused() {
            debug!("resume");
            run.controller.resume();
            self.report_pause_state();
        }
    }

    pub fn step_in(&mut self) {
        self.begin_step(StepMode::StepIn);
    }

    pub fn step_over(&mut self) {
        self.begin_step(StepMode::StepOver);
    }

    /// Only meaningful while paused.
    pub fn step_out(&mut self) {
        if self.run.as_ref().is_some_and(|run| run.controller.is_paused()) {
            self.begin_step(StepMode::StepOut);
        }
    }

    fn begin_step(&mut self, mode: StepMode) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        debug!(?mode, "step requested");
        run.controller.step(mode);
        self.report_pause_state();
    }

    /// Returns whether the breakpoint is now set.
    pub fn toggle_breakpoint(&mut self, line: usize) -> bool {
        self.breakpoints.toggle(line)
    }

    pub fn set_breakpoints(&mut self, lines: Vec<usize>) {
        self.breakpoints.replace(lines);
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.clock.set_speed(speed);
        debug!(speed = self.clock.speed(), "speed changed");
    }
}

/// One bounded burst of interpreter steps. Ends on a stop condition, when the
/// budget runs out outside of unwinding, or when the program is complete.
fn execute_burst(
    run: &mut Run,
    breakpoints: &BreakpointIndex,
    host: &mut dyn Host,
    request: BridgeRequest,
    budget: usize,
) -> Result<BurstReport, StepFailure> {
    let at_max_speed = request.at_max_speed;
    let mut burst = Burst::default();
    let mut report = BurstReport::default();
    run.response.seen_empty_get_callback = false;
    run.response.seen_return = false;

    loop {
        let signals = run.response.signals(&request);
        if run.controller.should_stop(&burst, &signals, at_max_speed) {
            break;
        }
        if report.steps >= budget && !burst.unwinding.is_active() {
            report.exhausted = true;
            break;
        }
        if run.program.is_complete() {
            break;
        }

        let cursor = ExecutionCursor::capture(run.program.as_ref(), &run.lines);
        if cursor.line.is_some() {
            run.last_user_line = cursor.line;
            if run.controller.is_paused() || !at_max_speed {
                select_current_line(run, host, false);
            }
        }

        let is_breakpoint = cursor.line.is_some_and(|line| breakpoints.contains(line));
        let safe = run.program.is_safe_to_continue_unwinding();
        if run.controller.arrive(&mut burst, &cursor, is_breakpoint, safe) {
            continue;
        }
        run.controller.refresh_stop_point(&burst, &cursor);

        let mut bridge = CallbackBridge::new(
            request,
            &mut run.queue,
            &mut run.timers,
            &mut run.response,
            host,
        );
        if let Err(error) = run.program.step(&mut bridge) {
            return Err(StepFailure {
                error,
                line: cursor.line,
            });
        }
        report.steps += 1;

        let after = ExecutionCursor::with_line(run.program.as_ref(), cursor.line);
        run.controller.observe_step(&mut burst, &after);

        let safe = run.program.is_safe_to_continue_unwinding();
        if run.controller.unwind(&mut burst, safe) {
            let line = ExecutionCursor::capture(run.program.as_ref(), &run.lines).line;
            run.controller.reselected(&mut burst, line);
        }

        let now = ExecutionCursor::capture(run.program.as_ref(), &run.lines);
        if run.controller.complete_step(&burst, now.line, now.depth) {
            break;
        }
    }

    report.reached_break = burst.reached_break;
    Ok(report)
}

fn select_current_line(run: &mut Run, host: &mut dyn Host, force: bool) {
    let line = ExecutionCursor::capture(run.program.as_ref(), &run.lines).line;
    if let Some(line) = line {
        if force || run.last_selected != Some(line) {
            host.select_line(line);
            run.last_selected = Some(line);
        }
    }
}
