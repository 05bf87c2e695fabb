use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SequencerError};
use crate::signal::RunSignal;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a suspend point polls its predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Suspend until `predicate` returns `Ok(true)`.
///
/// The predicate is evaluated once per poll interval and never while the
/// signal is paused; paused time does not count toward the timeout.
/// Cancellation is checked before every evaluation.
pub async fn wait_until<F>(mut predicate: F, opts: &WaitOptions, signal: &RunSignal) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let mut waited = Duration::ZERO;
    let mut last = Instant::now();

    loop {
        if signal.is_cancelled() {
            return Err(SequencerError::Cancelled);
        }

        let now = Instant::now();
        if signal.is_paused() {
            last = now;
        } else {
            waited += now.duration_since(last);
            last = now;

            if predicate()? {
                return Ok(());
            }
            if let Some(limit) = opts.timeout {
                if waited >= limit {
                    return Err(SequencerError::Timeout(limit));
                }
            }
        }

        tokio::time::sleep(opts.poll_interval).await;
    }
}
