//! Debug Adapter Protocol front end.

mod protocol;
mod server;

use crate::config::SchedulerConfig;
use crate::error::DapError;
use std::io;

pub use protocol::{encode, read_message, DapMessage, DapMessageContent, DapWriter};
pub use server::DapServer;

/// Serve one debug session over stdin/stdout.
pub fn run_dap_mode(config: SchedulerConfig) -> Result<(), DapError> {
    let mut server = DapServer::new(io::stdout(), config);
    let mut input = io::stdin().lock();
    server.run(&mut input)
}
