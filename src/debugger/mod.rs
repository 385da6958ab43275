mod breakpoints;
mod controller;
mod cursor;
mod history;
mod stepping;

pub use breakpoints::BreakpointIndex;
pub use controller::{BridgeSignals, Burst, ExecState, PauseState, StepController, Unwinding};
pub use cursor::ExecutionCursor;
pub use history::CallDepthHistory;
pub use stepping::{DebugCommand, StepMode, StopReason};
