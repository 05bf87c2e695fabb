pub mod action;
pub mod command;
pub mod condition;
pub mod config;
pub mod error;
pub mod gate;
pub mod host;
pub mod sequence;
pub mod signal;
pub mod wait;

pub use action::Action;
pub use command::{Command, CommandHandle, CommandState};
pub use condition::Condition;
pub use config::{ExplicitKeys, LoopCount, RetentionPolicy, SequenceConfig};
pub use error::{Result, SequencerError};
pub use gate::GateProtocol;
pub use host::{ExecutionHost, ProcessFactory, Routine, TokioHost};
pub use sequence::{ListKind, RunOutcome, RunReport, Sequence, SequenceState};
pub use signal::RunSignal;
pub use wait::{wait_until, WaitOptions};
