//! Shell subprocesses as process-backed sequencer Actions.
//!
//! [`ShellCommand`] turns a shell line into a routine factory; [`ShellHost`]
//! is an [`ExecutionHost`](sequencer_core::ExecutionHost) that bounds how many
//! of those routines run at once.

mod command;
mod error;
mod host;

pub use command::ShellCommand;
pub use error::{Result, ShellError};
pub use host::ShellHost;
