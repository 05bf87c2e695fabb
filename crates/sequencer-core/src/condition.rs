use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SequencerError};

/// A zero-argument predicate polled by [`Condition::Predicate`].
pub type PredicateFn = Arc<dyn Fn() -> Result<bool> + Send + Sync>;

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A resettable, armable predicate gating the start or the end of an Action.
///
/// Every variant answers the same three calls: [`arm`](Self::arm),
/// [`statement`](Self::statement) and [`reset`](Self::reset). Polling never
/// mutates the condition, and `reset` is valid on a condition that was
/// never armed.
#[derive(Clone, Default)]
pub enum Condition {
    /// Always satisfied.
    #[default]
    Immediate,
    /// Satisfied once `duration` has elapsed since arming.
    TimedWait {
        duration: Duration,
        deadline: Option<Instant>,
    },
    /// Satisfied whenever the wrapped predicate returns `true`.
    Predicate(PredicateFn),
}

impl Condition {
    pub fn immediate() -> Self {
        Self::Immediate
    }

    pub fn timed_wait(duration: Duration) -> Self {
        Self::TimedWait {
            duration,
            deadline: None,
        }
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(move || Ok(f())))
    }

    /// A predicate whose failure aborts the pass that polls it.
    pub fn try_predicate<F>(f: F) -> Self
    where
        F: Fn() -> Result<bool> + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Build a predicate condition from a possibly missing function.
    pub fn from_predicate(f: Option<PredicateFn>) -> Result<Self> {
        f.map(Self::Predicate).ok_or_else(|| {
            SequencerError::InvalidArgument("predicate condition requires a function".into())
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::TimedWait { .. } => "timed_wait",
            Self::Predicate(_) => "predicate",
        }
    }

    /// Start gating. For a timed wait this schedules the deadline and returns
    /// at once.
    pub fn arm(&mut self) {
        if let Self::TimedWait { duration, deadline } = self {
            *deadline = Some(Instant::now() + *duration);
        }
    }

    pub fn statement(&self) -> Result<bool> {
        match self {
            Self::Immediate => Ok(true),
            Self::TimedWait { deadline, .. } => {
                Ok(deadline.is_some_and(|at| Instant::now() >= at))
            }
            Self::Predicate(f) => f(),
        }
    }

    pub fn reset(&mut self) {
        if let Self::TimedWait { deadline, .. } = self {
            *deadline = None;
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::TimedWait { duration, deadline } => f
                .debug_struct("TimedWait")
                .field("duration", duration)
                .field("armed", &deadline.is_some())
                .finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn immediate_is_always_true() {
        let mut cond = Condition::immediate();
        assert!(cond.statement().unwrap());
        cond.arm();
        cond.reset();
        assert!(cond.statement().unwrap());
    }

    #[tokio::test]
    async fn timed_wait_is_false_until_elapsed() {
        let mut cond = Condition::timed_wait(Duration::from_millis(20));
        assert!(!cond.statement().unwrap(), "unarmed timer is not satisfied");

        cond.arm();
        assert!(!cond.statement().unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cond.statement().unwrap());
        assert!(cond.statement().unwrap(), "stays satisfied until reset");

        cond.reset();
        assert!(!cond.statement().unwrap());
    }

    #[test]
    fn reset_without_arm_is_harmless() {
        let mut cond = Condition::timed_wait(Duration::from_secs(5));
        cond.reset();
        assert!(!cond.statement().unwrap());
    }

    #[test]
    fn zero_duration_timer_is_satisfied_once_armed() {
        let mut cond = Condition::timed_wait(Duration::ZERO);
        cond.arm();
        assert!(cond.statement().unwrap());
    }

    #[test]
    fn predicate_is_evaluated_on_every_poll() {
        let flag = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (f, c) = (Arc::clone(&flag), Arc::clone(&calls));
        let cond = Condition::predicate(move || {
            c.fetch_add(1, Ordering::SeqCst);
            f.load(Ordering::SeqCst)
        });

        assert!(!cond.statement().unwrap());
        assert!(!cond.statement().unwrap());
        flag.store(true, Ordering::SeqCst);
        assert!(cond.statement().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn missing_predicate_is_invalid() {
        let err = Condition::from_predicate(None).unwrap_err();
        assert!(matches!(err, SequencerError::InvalidArgument(_)));
    }

    #[test]
    fn failing_predicate_surfaces_error() {
        let cond = Condition::try_predicate(|| Err(SequencerError::Work("sensor offline".into())));
        assert!(cond.statement().is_err());
    }

    #[test]
    fn default_is_immediate() {
        assert_eq!(Condition::default().kind(), "immediate");
    }
}
