mod bridge;
mod clock;
mod dap_runner;
mod host;
mod queue;
mod runner;
mod scheduler;

pub use bridge::{
    marshal, BridgeRequest, CallbackBridge, CallbackResponse, LATE_RETURN_HINT,
    LATE_RETURN_WARNING,
};
pub use clock::{Clock, PendingTick};
pub use dap_runner::run_with_commands;
pub use host::{ConsoleHost, Host, HostEvent, RecordingHost};
pub use queue::{EventEntry, EventQueue, Timers};
pub use runner::run_interactive;
pub use scheduler::{finish_when_idle, FinishPredicate, RunOutcome, RunStatus, TickScheduler};
