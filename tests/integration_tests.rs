use std::cell::Cell;
use std::rc::Rc;
use tickstep::config::SchedulerConfig;
use tickstep::error::StepError;
use tickstep::executor::{finish_when_idle, RecordingHost, TickScheduler};
use tickstep::interpreter::{Interpreter, Natives, NodeKind, TopFrame};
use tickstep::script;
use tickstep::source::ProgramText;

// Helper to build a scheduler that finishes once the program goes idle
fn idle_scheduler(config: SchedulerConfig, host: &RecordingHost) -> TickScheduler {
    TickScheduler::new(config, host.clone()).with_finish(finish_when_idle())
}

// Helper to load a script and start it
fn start_script(scheduler: &mut TickScheduler, source: &str) {
    let (program, text) = script::load(source).expect("test program should parse");
    scheduler.start(Box::new(program), text.line_map());
}

// Fire pending ticks until the run ends or the debugger comes to rest
fn drive(scheduler: &mut TickScheduler, max_ticks: usize) {
    for _ in 0..max_ticks {
        if scheduler.is_at_rest() {
            break;
        }
        let Some(tick) = scheduler.take_pending_tick() else {
            break;
        };
        scheduler.on_tick(tick);
    }
}

fn paused_on_entry() -> SchedulerConfig {
    SchedulerConfig {
        pause_on_entry: true,
        ..SchedulerConfig::default()
    }
}

/// Never finishes and never reaches user code; counts its steps.
struct Spin {
    steps: Rc<Cell<usize>>,
}

impl Interpreter for Spin {
    fn step(&mut self, _natives: &mut dyn Natives) -> Result<(), StepError> {
        self.steps.set(self.steps.get() + 1);
        Ok(())
    }

    fn position(&self) -> Option<usize> {
        None
    }

    fn stack_depth(&self) -> usize {
        1
    }

    fn top_frame(&self) -> Option<TopFrame> {
        Some(TopFrame {
            kind: NodeKind::Other,
            done: false,
        })
    }

    fn is_safe_to_continue_unwinding(&self) -> bool {
        false
    }

    fn is_complete(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod scheduler_tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tickstep::executor::{HostEvent, RunOutcome, LATE_RETURN_HINT, LATE_RETURN_WARNING};
    use tickstep::interpreter::CallbackRef;

    #[test]
    fn test_infinite_loop_at_max_speed_still_yields() {
        let host = RecordingHost::new();
        let config = SchedulerConfig {
            tick_budget: 100,
            ..SchedulerConfig::default()
        };
        let mut scheduler = idle_scheduler(config, &host);
        start_script(&mut scheduler, "set n = 0\nwhile true\n  set n = n + 1\nend\n");

        // The first tick ran synchronously and gave control back.
        assert!(scheduler.is_running());
        assert_eq!(scheduler.tick_count(), 1);
        assert_eq!(scheduler.pending_tick().unwrap().delay, Duration::ZERO);

        drive(&mut scheduler, 3);
        assert_eq!(scheduler.tick_count(), 4);
        assert!(scheduler.outcome().is_none());

        scheduler.stop();
        assert_eq!(scheduler.outcome(), Some(&RunOutcome::Stopped));
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_tick_budget_bounds_each_burst() {
        let host = RecordingHost::new();
        let config = SchedulerConfig {
            tick_budget: 25,
            speed: 0.5,
            ..SchedulerConfig::default()
        };
        let steps = Rc::new(Cell::new(0));
        let mut scheduler = TickScheduler::new(config, host);
        let text = ProgramText::new(String::new(), 0, 0);
        scheduler.start(
            Box::new(Spin {
                steps: Rc::clone(&steps),
            }),
            text.line_map(),
        );
        assert_eq!(steps.get(), 25);

        drive(&mut scheduler, 2);
        assert_eq!(steps.get(), 75);
    }

    #[test]
    fn test_below_max_speed_runs_one_line_per_tick() {
        let host = RecordingHost::new();
        let config = SchedulerConfig {
            speed: 0.5,
            ..SchedulerConfig::default()
        };
        let mut scheduler = idle_scheduler(config, &host);
        start_script(&mut scheduler, "print 1\nprint 2\nprint 3\n");

        assert_eq!(host.output_lines(), vec!["1"]);
        assert_eq!(
            scheduler.pending_tick().unwrap().delay,
            Duration::from_millis(75)
        );

        drive(&mut scheduler, 1);
        assert_eq!(host.output_lines(), vec!["1", "2"]);

        drive(&mut scheduler, 20);
        assert_eq!(host.output_lines(), vec!["1", "2", "3"]);
        assert_eq!(host.outcome(), Some(RunOutcome::Completed));
    }

    #[test]
    fn test_zero_delay_timeout_is_delivered_next_tick() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(SchedulerConfig::default(), &host);
        start_script(&mut scheduler, "func f\n  print \"fired\"\nend\ntimeout f 0\n");

        assert_eq!(scheduler.queue_len(), 1);
        assert!(host.output_lines().is_empty());
        assert!(scheduler.is_running());

        drive(&mut scheduler, 1);
        assert_eq!(host.output_lines(), vec!["fired"]);
        assert_eq!(scheduler.outcome(), Some(&RunOutcome::Completed));
    }

    #[test]
    fn test_timeout_beyond_the_clock_range_never_fires() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(SchedulerConfig::default(), &host);
        start_script(
            &mut scheduler,
            "func f\n  print \"fired\"\nend\ntimeout f 10000000000000000000000.0\nprint \"after\"\n",
        );

        drive(&mut scheduler, 3);
        assert_eq!(host.output_lines(), vec!["after"]);
        assert!(scheduler.is_running());
        assert!(scheduler.outcome().is_none());
        assert!(scheduler
            .idle_wait()
            .is_some_and(|wait| wait <= Duration::from_secs(60)));
    }

    #[test]
    fn test_step_failure_is_attributed_and_ends_the_run() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(SchedulerConfig::default(), &host);
        start_script(&mut scheduler, "set a = 1\nprint nope\n");

        let message = "`nope` is not defined".to_string();
        assert_eq!(
            host.output_lines(),
            vec!["ERROR: Line 2: `nope` is not defined"]
        );
        assert!(host
            .events()
            .contains(&HostEvent::Annotate(Some(2), message.clone())));
        assert_eq!(
            scheduler.outcome(),
            Some(&RunOutcome::Failed {
                message,
                line: Some(2)
            })
        );
        assert!(!scheduler.is_running());
        assert!(scheduler.pending_tick().is_none());
    }

    #[test]
    fn test_max_ticks_times_out() {
        let host = RecordingHost::new();
        let config = SchedulerConfig {
            tick_budget: 50,
            max_ticks: Some(3),
            ..SchedulerConfig::default()
        };
        let mut scheduler = idle_scheduler(config, &host);
        start_script(&mut scheduler, "while true\n  set x = 1\nend\n");

        drive(&mut scheduler, 10);
        assert_eq!(
            scheduler.outcome(),
            Some(&RunOutcome::TimedOut { ticks: 3 })
        );
    }

    #[test]
    fn test_dispatch_sync_returns_the_callback_value() {
        let host = RecordingHost::new();
        let mut scheduler = TickScheduler::new(SchedulerConfig::default(), host.clone());
        assert_eq!(
            scheduler.dispatch_sync(CallbackRef::new("key"), vec![json!("a")]),
            None
        );

        start_script(&mut scheduler, "func key k\n  return k + \"!\"\nend\n");
        let value = scheduler.dispatch_sync(CallbackRef::new("key"), vec![json!("a")]);
        assert_eq!(value, Some(json!("a!")));
        assert!(host.output_lines().is_empty());
        assert!(scheduler.is_running());
    }

    #[test]
    fn test_late_return_value_warns() {
        let source = "func key k\n  return k\nend\ntimeout key 0 \"x\"\n";

        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(SchedulerConfig::default(), &host);
        start_script(&mut scheduler, source);
        drive(&mut scheduler, 10);
        assert_eq!(host.output_lines(), vec![LATE_RETURN_WARNING]);

        let host = RecordingHost::new();
        let config = SchedulerConfig {
            speed: 0.5,
            ..SchedulerConfig::default()
        };
        let mut scheduler = idle_scheduler(config, &host);
        start_script(&mut scheduler, source);
        drive(&mut scheduler, 50);
        assert_eq!(
            host.output_lines(),
            vec![LATE_RETURN_WARNING, LATE_RETURN_HINT]
        );
        assert_eq!(host.outcome(), Some(RunOutcome::Completed));
    }

    #[test]
    fn test_reset_is_idempotent_and_stale_ticks_are_ignored() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(paused_on_entry(), &host);
        scheduler.reset();
        assert!(!scheduler.is_running());

        start_script(&mut scheduler, "print 1\nprint 2\n");
        scheduler.toggle_breakpoint(2);
        let stale = scheduler.take_pending_tick().unwrap();

        for _ in 0..2 {
            scheduler.reset();
            assert!(!scheduler.is_running());
            assert!(scheduler.outcome().is_none());
            assert!(scheduler.breakpoints().is_empty());
            assert!(scheduler.pending_tick().is_none());
            assert_eq!(scheduler.tick_count(), 0);
        }

        host.clear();
        scheduler.on_tick(stale);
        assert!(host.events().is_empty());
    }

    #[test]
    fn test_tick_from_a_previous_run_is_ignored() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(paused_on_entry(), &host);
        start_script(&mut scheduler, "print 1\n");
        let stale = scheduler.take_pending_tick().unwrap();

        start_script(&mut scheduler, "print 2\nprint 3\n");
        scheduler.on_tick(stale);
        assert!(host.stops().is_empty());
        assert_eq!(scheduler.tick_count(), 0);

        drive(&mut scheduler, 1);
        assert_eq!(host.stops().len(), 1);
        assert_eq!(scheduler.current_line(), Some(1));
    }
}

#[cfg(test)]
mod stepping_tests {
    use super::*;
    use tickstep::debugger::{StepMode, StopReason};
    use tickstep::executor::{HostEvent, RunOutcome};

    #[test]
    fn test_breakpoint_then_step_over_reaches_next_line() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(SchedulerConfig::default(), &host);
        scheduler.toggle_breakpoint(3);
        start_script(
            &mut scheduler,
            "set a = 1\nset b = 2\nset c = a + b\nprint c\nprint \"end\"\n",
        );

        assert_eq!(host.stops(), vec![(StopReason::Breakpoint, Some(3))]);
        assert!(scheduler.is_at_rest());
        assert_eq!(scheduler.pause_state().stopped_at_line, Some(3));

        host.clear();
        scheduler.step_over();
        drive(&mut scheduler, 5);
        assert_eq!(host.stops(), vec![(StopReason::Step, Some(4))]);
        assert!(!host.events().contains(&HostEvent::Select(3)));
        assert!(host.output_lines().is_empty());

        scheduler.resume();
        drive(&mut scheduler, 5);
        assert_eq!(host.output_lines(), vec!["3", "end"]);
        assert_eq!(host.outcome(), Some(RunOutcome::Completed));
    }

    #[test]
    fn test_breakpoint_fires_again_on_each_loop_iteration() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(SchedulerConfig::default(), &host);
        scheduler.toggle_breakpoint(3);
        start_script(
            &mut scheduler,
            "set i = 0\nwhile i < 2\n  set i = i + 1\nend\nprint i\n",
        );
        assert_eq!(host.stops().len(), 1);

        scheduler.resume();
        drive(&mut scheduler, 5);
        assert_eq!(
            host.stops(),
            vec![
                (StopReason::Breakpoint, Some(3)),
                (StopReason::Breakpoint, Some(3))
            ]
        );

        scheduler.resume();
        drive(&mut scheduler, 5);
        assert_eq!(host.output_lines(), vec!["2"]);
        assert_eq!(host.outcome(), Some(RunOutcome::Completed));
    }

    #[test]
    fn test_pause_on_entry_stops_before_the_first_line() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(paused_on_entry(), &host);
        start_script(&mut scheduler, "print 1\nprint 2\n");
        assert!(host.stops().is_empty());
        assert!(!scheduler.is_at_rest());

        drive(&mut scheduler, 5);
        assert_eq!(host.stops(), vec![(StopReason::Entry, Some(1))]);
        assert!(host.output_lines().is_empty());

        scheduler.step_over();
        drive(&mut scheduler, 5);
        assert_eq!(host.output_lines(), vec!["1"]);
        assert_eq!(host.stops()[1], (StopReason::Step, Some(2)));
    }

    #[test]
    fn test_step_over_a_call_stays_in_the_caller() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(paused_on_entry(), &host);
        start_script(
            &mut scheduler,
            "func f\n  print \"a\"\nend\ncall f\nprint \"b\"\n",
        );
        drive(&mut scheduler, 5);
        assert_eq!(host.stops(), vec![(StopReason::Entry, Some(4))]);
        let entry_depth = scheduler.pause_state().stopped_at_depth.unwrap();

        scheduler.step_over();
        drive(&mut scheduler, 5);
        assert_eq!(host.output_lines(), vec!["a"]);
        assert_eq!(host.stops()[1], (StopReason::Step, Some(5)));
        assert_eq!(scheduler.pause_state().stopped_at_depth, Some(entry_depth));
    }

    #[test]
    fn test_step_in_then_step_out() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(paused_on_entry(), &host);
        start_script(
            &mut scheduler,
            "func f\n  print \"in f\"\n  print \"still f\"\nend\ncall f\nprint \"done\"\n",
        );
        drive(&mut scheduler, 5);
        assert_eq!(host.stops(), vec![(StopReason::Entry, Some(5))]);

        scheduler.step_in();
        drive(&mut scheduler, 5);
        assert_eq!(host.stops()[1], (StopReason::Step, Some(2)));
        let inner_depth = scheduler.pause_state().stopped_at_depth.unwrap();

        scheduler.step_out();
        drive(&mut scheduler, 5);
        assert_eq!(host.output_lines(), vec!["in f", "still f"]);
        assert_eq!(host.stops()[2], (StopReason::Step, Some(6)));
        let outer_depth = scheduler.pause_state().stopped_at_depth.unwrap();
        assert!(outer_depth < inner_depth);
    }

    #[test]
    fn test_step_out_is_ignored_while_running() {
        let host = RecordingHost::new();
        let config = SchedulerConfig {
            speed: 0.5,
            ..SchedulerConfig::default()
        };
        let mut scheduler = idle_scheduler(config, &host);
        start_script(&mut scheduler, "print 1\nprint 2\n");
        scheduler.step_out();
        assert!(!scheduler.pause_state().paused);
    }

    #[test]
    fn test_pause_stops_a_running_program() {
        let host = RecordingHost::new();
        let config = SchedulerConfig {
            speed: 0.5,
            ..SchedulerConfig::default()
        };
        let mut scheduler = idle_scheduler(config, &host);
        start_script(&mut scheduler, "print 1\nprint 2\nprint 3\n");

        scheduler.pause();
        assert_eq!(host.stops(), vec![(StopReason::Pause, None)]);
        assert!(scheduler.is_at_rest());

        drive(&mut scheduler, 5);
        assert_eq!(host.output_lines(), vec!["1"]);

        scheduler.resume();
        drive(&mut scheduler, 20);
        assert_eq!(host.output_lines(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_step_past_the_last_line_completes_the_run() {
        for name in ["over", "in", "out"] {
            let host = RecordingHost::new();
            let mut scheduler = idle_scheduler(paused_on_entry(), &host);
            start_script(&mut scheduler, "print 1\n");
            drive(&mut scheduler, 5);
            assert_eq!(host.stops(), vec![(StopReason::Entry, Some(1))], "step {}", name);

            match name {
                "over" => scheduler.step_over(),
                "in" => scheduler.step_in(),
                _ => scheduler.step_out(),
            }
            drive(&mut scheduler, 20);
            assert_eq!(host.output_lines(), vec!["1"], "step {}", name);
            assert_eq!(host.outcome(), Some(RunOutcome::Completed), "step {}", name);
            assert!(!scheduler.is_running(), "step {}", name);
        }
    }

    #[test]
    fn test_step_out_at_top_level_runs_on() {
        let host = RecordingHost::new();
        let mut scheduler = idle_scheduler(paused_on_entry(), &host);
        start_script(&mut scheduler, "print 1\nprint 2\nprint 3\n");
        drive(&mut scheduler, 5);
        assert_eq!(host.stops(), vec![(StopReason::Entry, Some(1))]);

        scheduler.step_out();
        drive(&mut scheduler, 20);
        assert_eq!(host.stops().len(), 1);
        assert_eq!(host.output_lines(), vec!["1", "2", "3"]);
        assert_eq!(host.outcome(), Some(RunOutcome::Completed));
    }

    #[test]
    fn test_pause_interrupts_a_pending_step() {
        let host = RecordingHost::new();
        let config = SchedulerConfig {
            tick_budget: 100,
            ..paused_on_entry()
        };
        let mut scheduler = idle_scheduler(config, &host);
        start_script(
            &mut scheduler,
            "func f\n  set n = 0\n  while true\n    set n = n + 1\n  end\nend\ncall f\n",
        );
        drive(&mut scheduler, 5);
        assert_eq!(host.stops(), vec![(StopReason::Entry, Some(7))]);

        // The call never returns, so the step over cannot complete.
        scheduler.step_over();
        drive(&mut scheduler, 5);
        assert!(!scheduler.is_at_rest());
        assert_eq!(host.stops().len(), 1);

        scheduler.pause();
        assert!(scheduler.is_at_rest());
        assert_eq!(scheduler.pause_state().step_mode, StepMode::Run);
        assert_eq!(host.stops().len(), 2);
        assert_eq!(host.stops()[1].0, StopReason::Pause);

        let ticks = scheduler.tick_count();
        drive(&mut scheduler, 5);
        assert_eq!(scheduler.tick_count(), ticks);
        assert!(scheduler.is_running());
    }
}
