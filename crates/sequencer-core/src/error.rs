use std::time::Duration;

use thiserror::Error;

use crate::sequence::ListKind;

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} list is empty")]
    EmptyList(ListKind),

    #[error("run cancelled")]
    Cancelled,

    #[error("wait timed out after {0:?}")]
    Timeout(Duration),

    #[error("unit of work failed: {0}")]
    Work(String),

    #[error("process failed: {0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl SequencerError {
    /// `true` for the cooperative cancellation signal, which a Sequence turns
    /// into a clean `Idle` transition instead of reporting it.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_names_the_list() {
        let err = SequencerError::EmptyList(ListKind::Undo);
        assert_eq!(err.to_string(), "undo list is empty");
    }

    #[test]
    fn only_cancelled_reports_cancelled() {
        assert!(SequencerError::Cancelled.is_cancelled());
        assert!(!SequencerError::Timeout(Duration::from_millis(5)).is_cancelled());
        assert!(!SequencerError::Work("boom".into()).is_cancelled());
    }
}
