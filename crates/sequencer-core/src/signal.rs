//! Per-run cancellation scope.
//!
//! A `RunSignal` is created fresh for every `execute_sequence` /
//! `undo_sequence` call and shared (by clone) with every wait inside that
//! run. Cancellation and pausing are cooperative: they are only observed at
//! suspend points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

#[derive(Debug)]
struct SignalInner {
    id: Uuid,
    cancelled: AtomicBool,
    paused: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct RunSignal {
    inner: Arc<SignalInner>,
}

impl RunSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: Uuid::new_v4(),
                cancelled: AtomicBool::new(false),
                paused: AtomicBool::new(false),
            }),
        }
    }

    /// A scope nobody holds a handle to, for driving a lone Command.
    pub fn detached() -> Self {
        Self::new()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Two handles belong to the same run.
    pub fn same_scope(&self, other: &RunSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for RunSignal {
    fn default() -> Self {
        Self::new()
    }
}
