//! A unit of work wrapped in a gate protocol.
//!
//! Two kinds of work are supported: an immediate callable, complete as soon
//! as it returns, and a process-backed routine handed to an
//! [`ExecutionHost`]. In both cases the *completion flag* (the work itself
//! is done) is separate from the gate's exit condition; the owning Command
//! waits for each in turn.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::condition::Condition;
use crate::error::{Result, SequencerError};
use crate::gate::GateProtocol;
use crate::host::{ExecutionHost, ProcessFactory, Routine};

type WorkFn = Box<dyn FnMut() -> Result<()> + Send>;
type Callback = Box<dyn FnMut() + Send>;

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Shared between an Action and the task driving its process. Replaced on
/// every reset so a task from an earlier pass cannot complete a later one.
#[derive(Default)]
struct Completion {
    done: AtomicBool,
    failure: Mutex<Option<SequencerError>>,
}

impl Completion {
    fn succeed(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    fn fail(&self, err: SequencerError) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = Some(err);
        }
        self.done.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

enum Work {
    Immediate(WorkFn),
    Process {
        factory: ProcessFactory,
        host: Arc<dyn ExecutionHost>,
        current: Option<Routine>,
        running: Option<JoinHandle<()>>,
    },
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

pub struct Action {
    name: String,
    work: Work,
    gate: GateProtocol,
    completion: Arc<Completion>,
    on_start: Option<Callback>,
    on_complete: Option<Callback>,
}

impl Action {
    /// Work that is complete as soon as `f` returns.
    pub fn immediate<F>(mut f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::try_immediate(move || {
            f();
            Ok(())
        })
    }

    /// Immediate work whose error aborts the current pass.
    pub fn try_immediate<F>(f: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        Self::with_work("immediate", Work::Immediate(Box::new(f)))
    }

    /// Work driven by `host`; `factory` builds a fresh routine for each pass.
    pub fn process<F>(factory: F, host: Arc<dyn ExecutionHost>) -> Self
    where
        F: Fn() -> Routine + Send + Sync + 'static,
    {
        let factory: ProcessFactory = Arc::new(factory);
        let current = Some(factory());
        Self::with_work(
            "process",
            Work::Process {
                factory,
                host,
                current,
                running: None,
            },
        )
    }

    /// Process-backed constructor for callers holding optional collaborators.
    pub fn try_process(
        factory: Option<ProcessFactory>,
        host: Option<Arc<dyn ExecutionHost>>,
    ) -> Result<Self> {
        let factory = factory.ok_or_else(|| {
            SequencerError::InvalidArgument("process action requires a factory".into())
        })?;
        let host = host.ok_or_else(|| {
            SequencerError::InvalidArgument("process action requires an execution host".into())
        })?;
        Ok(Self::process(move || factory(), host))
    }

    fn with_work(name: &str, work: Work) -> Self {
        Self {
            name: name.to_string(),
            work,
            gate: GateProtocol::default(),
            completion: Arc::new(Completion::default()),
            on_start: None,
            on_complete: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_gate(mut self, gate: GateProtocol) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_entry(mut self, entry: Condition) -> Self {
        *self.gate.entry_mut() = entry;
        self
    }

    pub fn with_exit(mut self, exit: Condition) -> Self {
        *self.gate.exit_mut() = exit;
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_start = Some(Box::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_process(&self) -> bool {
        matches!(self.work, Work::Process { .. })
    }

    pub fn gate(&self) -> &GateProtocol {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut GateProtocol {
        &mut self.gate
    }

    /// Run the unit of work once.
    ///
    /// Immediate work completes before this returns. Process work is handed
    /// to the host in the background; poll [`completion`](Self::completion)
    /// to learn when it finished.
    pub fn invoke(&mut self) -> Result<()> {
        match &mut self.work {
            Work::Immediate(f) => {
                f()?;
                self.completion.succeed();
            }
            Work::Process {
                factory,
                host,
                current,
                running,
            } => {
                let routine = current.take().unwrap_or_else(|| factory());
                let drive = host.drive(routine);
                let completion = Arc::clone(&self.completion);
                *running = Some(tokio::spawn(async move {
                    match drive.await {
                        Ok(()) => completion.succeed(),
                        Err(e) => completion.fail(e),
                    }
                }));
            }
        }
        Ok(())
    }

    /// `Ok(true)` once the work itself is done. A failed process surfaces
    /// its error here, exactly once.
    pub fn completion(&self) -> Result<bool> {
        if !self.completion.done.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let failure = self
            .completion
            .failure
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match failure {
            Some(err) => Err(err),
            None => Ok(true),
        }
    }

    pub fn fire_start(&mut self) {
        if let Some(cb) = self.on_start.as_mut() {
            cb();
        }
    }

    /// Fire the completion callback, then reset for the next pass.
    pub fn finish(&mut self) {
        if let Some(cb) = self.on_complete.as_mut() {
            cb();
        }
        self.reset();
    }

    /// Return to the pre-invocation state: gate conditions reset, completion
    /// cleared and, for process work, a fresh routine built. A routine still
    /// running from an abandoned pass is stopped.
    pub fn reset(&mut self) {
        self.gate.reset();
        self.completion = Arc::new(Completion::default());
        if let Work::Process {
            factory,
            current,
            running,
            ..
        } = &mut self.work
        {
            if let Some(task) = running.take() {
                task.abort();
            }
            *current = Some(factory());
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("process", &self.is_process())
            .field("gate", &self.gate)
            .field("complete", &self.completion.done.load(Ordering::SeqCst))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TokioHost;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_factory(
        builds: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
    ) -> impl Fn() -> Routine + Send + Sync + 'static {
        move || {
            builds.fetch_add(1, Ordering::SeqCst);
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<(), SequencerError>(())
            }
            .boxed()
        }
    }

    async fn settle(action: &Action) -> Result<bool> {
        for _ in 0..100 {
            if action.completion()? {
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Ok(false)
    }

    #[test]
    fn immediate_completes_synchronously() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let mut action = Action::immediate(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!action.completion().unwrap());
        action.invoke().unwrap();
        assert!(action.completion().unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        action.reset();
        assert!(!action.completion().unwrap());
    }

    #[test]
    fn immediate_error_is_returned_from_invoke() {
        let mut action = Action::try_immediate(|| Err(SequencerError::Work("disk full".into())));
        assert!(action.invoke().is_err());
        assert!(!action.completion().unwrap());
    }

    #[test]
    fn missing_factory_or_host_is_invalid() {
        let host: Arc<dyn ExecutionHost> = Arc::new(TokioHost);
        let err = Action::try_process(None, Some(host)).unwrap_err();
        assert!(matches!(err, SequencerError::InvalidArgument(_)));

        let factory: ProcessFactory = Arc::new(|| async { Ok::<(), SequencerError>(()) }.boxed());
        let err = Action::try_process(Some(factory), None).unwrap_err();
        assert!(matches!(err, SequencerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn process_runs_on_host_and_reset_builds_fresh_instance() {
        let builds = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let mut action = Action::process(
            counting_factory(Arc::clone(&builds), Arc::clone(&runs)),
            Arc::new(TokioHost),
        );
        assert!(action.is_process());
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        action.invoke().unwrap();
        assert!(settle(&action).await.unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        action.reset();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(!action.completion().unwrap());

        action.invoke().unwrap();
        assert!(settle(&action).await.unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn process_failure_surfaces_through_completion() {
        let mut action = Action::process(
            || async { Err::<(), _>(SequencerError::Process("exit status 2".into())) }.boxed(),
            Arc::new(TokioHost),
        );
        action.invoke().unwrap();
        let err = settle(&action).await.unwrap_err();
        assert!(matches!(err, SequencerError::Process(_)));
    }

    #[test]
    fn callbacks_fire_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&log), Arc::clone(&log));
        let mut action = Action::immediate(|| {})
            .on_start(move || a.lock().unwrap().push("start"))
            .on_complete(move || b.lock().unwrap().push("complete"));

        action.fire_start();
        action.invoke().unwrap();
        action.finish();
        assert_eq!(*log.lock().unwrap(), vec!["start", "complete"]);
        assert!(!action.completion().unwrap(), "finish resets the action");
    }

    #[test]
    fn builder_sets_name_and_gate() {
        let action = Action::immediate(|| {})
            .named("open-valve")
            .with_exit(Condition::timed_wait(Duration::from_millis(5)));
        assert_eq!(action.name(), "open-valve");
        assert_eq!(action.gate().entry().kind(), "immediate");
        assert_eq!(action.gate().exit().kind(), "timed_wait");

        let gated = Action::immediate(|| {}).with_gate(GateProtocol::new(
            Some(Condition::predicate(|| true)),
            None,
        ));
        assert_eq!(gated.gate().entry().kind(), "predicate");
        assert_eq!(gated.gate().exit().kind(), "immediate");
    }
}
