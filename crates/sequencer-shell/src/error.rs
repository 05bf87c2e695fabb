use sequencer_core::SequencerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` exited with code {code}{}", stderr_suffix(.stderr))]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("`{command}` terminated by signal{}", stderr_suffix(.stderr))]
    Signal { command: String, stderr: String },

    #[error("execution host closed")]
    HostClosed,
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nstderr: {stderr}")
    }
}

impl From<ShellError> for SequencerError {
    fn from(e: ShellError) -> Self {
        SequencerError::Process(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
