//! Tick scheduler and stepping debugger for a stepwise interpreter.
//!
//! The [`executor::TickScheduler`] runs a program in bounded bursts of
//! interpreter steps, one burst per host timer tick, and decides between
//! steps whether to pause for a breakpoint or a step operation. Programs
//! receive host events through a callback queue drained by a poll loop
//! appended to their source.

pub mod config;
pub mod dap;
pub mod debugger;
pub mod error;
pub mod executor;
pub mod interpreter;
pub mod parser;
pub mod script;
pub mod source;

pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use executor::{RunOutcome, TickScheduler};
