//! The execution-host seam for process-backed Actions.
//!
//! A process is an opaque future ([`Routine`]) built by a factory. The core
//! never runs one itself: it hands each routine to an [`ExecutionHost`] and
//! waits for the host to report that it finished.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::error::{Result, SequencerError};

/// One instance of a long-running process.
pub type Routine = BoxFuture<'static, Result<()>>;

/// Builds a fresh [`Routine`] every time an Action is reset.
pub type ProcessFactory = Arc<dyn Fn() -> Routine + Send + Sync>;

pub trait ExecutionHost: Send + Sync {
    /// Drive `routine` to completion, yielding until it finishes.
    ///
    /// Dropping the returned future must stop the routine.
    fn drive(&self, routine: Routine) -> BoxFuture<'static, Result<()>>;
}

// ---------------------------------------------------------------------------
// TokioHost
// ---------------------------------------------------------------------------

/// Runs each routine as its own task on the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioHost;

struct AbortOnDrop(JoinHandle<Result<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ExecutionHost for TokioHost {
    fn drive(&self, routine: Routine) -> BoxFuture<'static, Result<()>> {
        let mut task = AbortOnDrop(tokio::spawn(routine));
        async move {
            match (&mut task.0).await {
                Ok(result) => result,
                Err(e) => Err(SequencerError::Process(format!("process task failed: {e}"))),
            }
        }
        .boxed()
    }
}
