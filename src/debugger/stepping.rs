use serde::{Deserialize, Serialize};

/// Step modes for the debugger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepMode {
    #[default]
    Run,
    StepIn,
    StepOver,
    StepOut,
}

/// Why execution came to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Entry,
    Breakpoint,
    Step,
    Pause,
}

/// Requests from a front end. Applied between steps, never mid-step.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugCommand {
    Pause,
    Resume,
    StepIn,
    StepOver,
    StepOut,
    ToggleBreakpoint(usize),
    SetBreakpoints(Vec<usize>),
    SetSpeed(f64),
    Stop,
}
