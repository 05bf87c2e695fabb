use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use sequencer_core::{ExecutionHost, Routine, SequencerError, TokioHost};
use tokio::sync::Semaphore;

use crate::error::ShellError;

/// Execution host that caps how many routines run at once.
///
/// Each routine runs on its own task once a permit is free. Dropping the drive
/// future aborts that task, which for a [`ShellCommand`](crate::ShellCommand)
/// kills the child.
#[derive(Debug, Clone)]
pub struct ShellHost {
    permits: Arc<Semaphore>,
    launches: Arc<AtomicUsize>,
}

impl ShellHost {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Routines started so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for ShellHost {
    fn default() -> Self {
        Self::new(4)
    }
}

impl ExecutionHost for ShellHost {
    fn drive(&self, routine: Routine) -> BoxFuture<'static, sequencer_core::Result<()>> {
        let permits = Arc::clone(&self.permits);
        let launches = Arc::clone(&self.launches);
        async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| SequencerError::from(ShellError::HostClosed))?;
            let n = launches.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(launch = n, "routine started");
            TokioHost.drive(routine).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShellCommand;
    use std::time::Duration;

    fn tracked(
        live: &Arc<AtomicUsize>,
        peak: &Arc<AtomicUsize>,
    ) -> Routine {
        let (live, peak) = (Arc::clone(live), Arc::clone(peak));
        async move {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            live.fetch_sub(1, Ordering::SeqCst);
            Ok::<(), SequencerError>(())
        }
        .boxed()
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_permits() {
        let host = ShellHost::new(2);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let drives: Vec<_> = (0..5)
            .map(|_| tokio::spawn(host.drive(tracked(&live, &peak))))
            .collect();
        for d in drives {
            d.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(host.launches(), 5);
        assert_eq!(host.available(), 2);
    }

    #[tokio::test]
    async fn zero_permits_is_treated_as_one() {
        let host = ShellHost::new(0);
        assert_eq!(host.available(), 1);
        host.drive(async { Ok::<(), SequencerError>(()) }.boxed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn shell_factory_runs_on_the_host() {
        let host = ShellHost::default();
        let factory = ShellCommand::new("exit 0").into_factory();
        host.drive(factory()).await.unwrap();
        host.drive(factory()).await.unwrap();
        assert_eq!(host.launches(), 2);

        let failing = ShellCommand::new("exit 4").into_factory();
        let err = host.drive(failing()).await.unwrap_err();
        assert!(matches!(err, SequencerError::Process(_)));
    }

    #[tokio::test]
    async fn panicking_routine_becomes_a_process_error() {
        let host = ShellHost::new(1);
        let routine: Routine = async {
            if true {
                panic!("boom");
            }
            Ok::<(), SequencerError>(())
        }
        .boxed();
        let err = host.drive(routine).await.unwrap_err();
        assert!(matches!(err, SequencerError::Process(_)));
        assert_eq!(host.available(), 1, "permit released after panic");
    }
}
