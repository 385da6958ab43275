use super::scheduler::TickScheduler;
use crate::debugger::DebugCommand;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long a paused run waits for a command before checking again.
const REST_POLL: Duration = Duration::from_millis(50);

/// Drive `scheduler` from a command channel until its run ends.
///
/// Commands are applied between ticks. While the debugger is at rest no
/// ticks fire; the loop just blocks on the channel. A closed channel stops
/// the run.
pub fn run_with_commands(scheduler: &mut TickScheduler, commands: &Receiver<DebugCommand>) {
    while scheduler.is_running() {
        if scheduler.is_at_rest() {
            match commands.recv_timeout(REST_POLL) {
                Ok(command) => apply(scheduler, command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("command channel closed while paused");
                    scheduler.stop();
                }
            }
            continue;
        }

        let Some(tick) = scheduler.take_pending_tick() else {
            break;
        };
        let wait = scheduler
            .idle_wait()
            .map_or(tick.delay, |idle| idle.max(tick.delay));
        let deadline = Instant::now() + wait;

        // Drain commands until the tick is due.
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    apply(scheduler, command);
                    if !scheduler.is_running() {
                        return;
                    }
                    continue;
                }
                Err(TryRecvError::Disconnected) => {
                    warn!("command channel closed");
                    scheduler.stop();
                    return;
                }
                Err(TryRecvError::Empty) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match commands.recv_timeout(deadline - now) {
                Ok(command) => {
                    apply(scheduler, command);
                    if !scheduler.is_running() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("command channel closed");
                    scheduler.stop();
                    return;
                }
            }
        }

        scheduler.on_tick(tick);
    }
}

fn apply(scheduler: &mut TickScheduler, command: DebugCommand) {
    debug!(?command, "command received");
    scheduler.apply(command);
}
