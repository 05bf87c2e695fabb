//! The sequence scheduler.
//!
//! A [`Sequence`] owns an execute list and an undo list of Commands and
//! drives one of them at a time through Execute or Undo, applying its
//! retention policy after every Command. `Sequence` is a cheap clonable
//! handle: any clone may start, pause, or kill the current run.
//!
//! At most one run is active per Sequence. Starting a new run cancels the
//! active one, gives it a grace period to unwind, and then takes over.

mod cursor;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{Command, CommandHandle};
use crate::config::{LoopCount, RetentionPolicy, SequenceConfig};
use crate::error::{Result, SequencerError};
use crate::signal::RunSignal;
use crate::wait::{wait_until, WaitOptions};

use cursor::ListCursor;

// ---------------------------------------------------------------------------
// ListKind / SequenceState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Execute,
    Undo,
}

impl ListKind {
    pub fn other(self) -> Self {
        match self {
            Self::Execute => Self::Undo,
            Self::Undo => Self::Execute,
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execute => f.write_str("execute"),
            Self::Undo => f.write_str("undo"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceState {
    Idle,
    Execute,
    Undo,
    Paused,
}

impl From<ListKind> for SequenceState {
    fn from(list: ListKind) -> Self {
        match list {
            ListKind::Execute => Self::Execute,
            ListKind::Undo => Self::Undo,
        }
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Summary of one `execute_sequence` / `undo_sequence` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub list: ListKind,
    pub policy: RetentionPolicy,
    /// Passes started, including a pass cut short by cancellation.
    pub passes: u32,
    /// Execute/Undo calls that reached `Completed`.
    pub commands_run: u32,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Counters saturate: a `Forever` loop can outlive `u32`.
    fn record_pass(&mut self) {
        self.passes = self.passes.saturating_add(1);
    }

    fn record_command(&mut self) {
        self.commands_run = self.commands_run.saturating_add(1);
    }
}

// ---------------------------------------------------------------------------
// Sequence internals
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Lists {
    execute: Vec<CommandHandle>,
    undo: Vec<CommandHandle>,
}

impl Lists {
    fn get(&self, list: ListKind) -> &Vec<CommandHandle> {
        match list {
            ListKind::Execute => &self.execute,
            ListKind::Undo => &self.undo,
        }
    }

    fn get_mut(&mut self, list: ListKind) -> &mut Vec<CommandHandle> {
        match list {
            ListKind::Execute => &mut self.execute,
            ListKind::Undo => &mut self.undo,
        }
    }
}

struct Control {
    state: SequenceState,
    paused_from: Option<SequenceState>,
    active: Option<RunSignal>,
}

impl Control {
    fn owns(&self, signal: &RunSignal) -> bool {
        self.active.as_ref().is_some_and(|a| a.same_scope(signal))
    }
}

struct Shared {
    config: SequenceConfig,
    lists: Mutex<Lists>,
    control: Mutex<Control>,
}

/// How a single pass over the target list ended.
enum PassEnd {
    Finished { visited: u32 },
    Cancelled,
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Sequence {
    shared: Arc<Shared>,
}

impl Sequence {
    pub fn new(policy: RetentionPolicy, loop_count: LoopCount) -> Self {
        Self::with_config(SequenceConfig::new(policy, loop_count))
    }

    pub fn with_config(config: SequenceConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                lists: Mutex::new(Lists::default()),
                control: Mutex::new(Control {
                    state: SequenceState::Idle,
                    paused_from: None,
                    active: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.shared.config
    }

    fn lists(&self) -> MutexGuard<'_, Lists> {
        self.shared
            .lists
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.shared
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Lists
    // -----------------------------------------------------------------------

    /// Append to the execute list. An absent command is logged and ignored.
    pub fn add_command(&self, command: impl Into<Option<Command>>) {
        match command.into() {
            Some(command) => {
                tracing::debug!(command = %command.name(), "command added");
                self.lists().execute.push(CommandHandle::new(command));
            }
            None => tracing::warn!("ignoring absent command"),
        }
    }

    pub fn len(&self, list: ListKind) -> usize {
        self.lists().get(list).len()
    }

    pub fn is_empty(&self) -> bool {
        let lists = self.lists();
        lists.execute.is_empty() && lists.undo.is_empty()
    }

    pub fn commands(&self, list: ListKind) -> Vec<CommandHandle> {
        self.lists().get(list).clone()
    }

    pub fn execute_names(&self) -> Vec<String> {
        self.names(ListKind::Execute)
    }

    pub fn undo_names(&self) -> Vec<String> {
        self.names(ListKind::Undo)
    }

    fn names(&self, list: ListKind) -> Vec<String> {
        self.lists()
            .get(list)
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SequenceState {
        self.control().state
    }

    /// A run is in flight (possibly paused).
    pub fn is_running(&self) -> bool {
        self.control().active.is_some()
    }

    /// Record the current state and switch to `Paused`. An in-flight run
    /// holds at its next suspend point until [`unpause`](Self::unpause).
    pub fn pause(&self) {
        let mut control = self.control();
        if control.state == SequenceState::Paused {
            tracing::warn!("sequence already paused");
            return;
        }
        control.paused_from = Some(control.state);
        control.state = SequenceState::Paused;
        if let Some(signal) = &control.active {
            signal.pause();
        }
        tracing::info!("sequence paused");
    }

    pub fn unpause(&self) {
        let mut control = self.control();
        if control.state != SequenceState::Paused {
            tracing::warn!(state = ?control.state, "unpause ignored: sequence is not paused");
            return;
        }
        control.state = control.paused_from.take().unwrap_or(SequenceState::Idle);
        if let Some(signal) = &control.active {
            signal.resume();
        }
        tracing::info!(state = ?control.state, "sequence resumed");
    }

    /// Cancel the active run, if any, and force `Idle`.
    pub fn kill(&self) {
        let mut control = self.control();
        if let Some(signal) = control.active.take() {
            tracing::info!(run_id = %signal.id(), "killing active run");
            signal.cancel();
        }
        control.state = SequenceState::Idle;
        control.paused_from = None;
    }

    /// Empty both lists and kill any in-flight run.
    pub fn clear(&self) {
        self.kill();
        let mut lists = self.lists();
        lists.execute.clear();
        lists.undo.clear();
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Drive the execute list. Overrides apply to this run only.
    pub async fn execute_sequence(
        &self,
        policy: Option<RetentionPolicy>,
        loop_count: Option<LoopCount>,
    ) -> Result<RunReport> {
        self.run(ListKind::Execute, policy, loop_count).await
    }

    /// Drive the undo list. Overrides apply to this run only.
    pub async fn undo_sequence(
        &self,
        policy: Option<RetentionPolicy>,
        loop_count: Option<LoopCount>,
    ) -> Result<RunReport> {
        self.run(ListKind::Undo, policy, loop_count).await
    }

    async fn run(
        &self,
        list: ListKind,
        policy: Option<RetentionPolicy>,
        loop_count: Option<LoopCount>,
    ) -> Result<RunReport> {
        let policy = policy.unwrap_or(self.shared.config.policy);
        let loop_count = loop_count.unwrap_or(self.shared.config.loop_count);
        let opts = self.shared.config.wait_options();

        if self.len(list) == 0 {
            return Err(SequencerError::EmptyList(list));
        }

        let signal = self.take_over().await;
        let mut report = RunReport {
            run_id: signal.id(),
            list,
            policy,
            passes: 0,
            commands_run: 0,
            outcome: RunOutcome::Cancelled,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        if !self.begin(&signal, list) {
            report.finished_at = Utc::now();
            return Ok(report);
        }
        tracing::info!(run_id = %signal.id(), %list, %policy, %loop_count, "run started");

        let result = self
            .drive_passes(&signal, list, policy, loop_count, &opts, &mut report)
            .await;
        self.finish(&signal);
        report.finished_at = Utc::now();

        match result {
            Ok(outcome) => {
                report.outcome = outcome;
                tracing::info!(
                    run_id = %signal.id(),
                    passes = report.passes,
                    commands = report.commands_run,
                    outcome = ?outcome,
                    "run finished"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(run_id = %signal.id(), error = %e, "run aborted");
                Err(e)
            }
        }
    }

    /// Install a fresh scope. A run already in flight is cancelled and given
    /// the grace period to unwind before this call proceeds.
    async fn take_over(&self) -> RunSignal {
        let signal = RunSignal::new();
        let previous = self.control().active.replace(signal.clone());
        if let Some(previous) = previous {
            tracing::warn!(
                cancelled = %previous.id(),
                run_id = %signal.id(),
                "run already active; cancelling it"
            );
            previous.cancel();
            tokio::time::sleep(self.shared.config.grace_period()).await;
        }
        signal
    }

    /// Enter the run's state unless the scope was replaced or killed while
    /// waiting out the grace period. A pending pause is kept and applied to
    /// the new scope, so `unpause` resumes into the run's state.
    fn begin(&self, signal: &RunSignal, list: ListKind) -> bool {
        let mut control = self.control();
        if signal.is_cancelled() || !control.owns(signal) {
            return false;
        }
        if control.state == SequenceState::Paused {
            // A pause issued while idle or during the grace period still holds.
            control.paused_from = Some(list.into());
            signal.pause();
        } else {
            control.state = list.into();
            control.paused_from = None;
        }
        true
    }

    /// Return to `Idle`, but only if this run still owns the sequence.
    fn finish(&self, signal: &RunSignal) {
        let mut control = self.control();
        if control.owns(signal) {
            control.active = None;
            control.state = SequenceState::Idle;
            control.paused_from = None;
        }
    }

    async fn drive_passes(
        &self,
        signal: &RunSignal,
        list: ListKind,
        policy: RetentionPolicy,
        loop_count: LoopCount,
        opts: &WaitOptions,
        report: &mut RunReport,
    ) -> Result<RunOutcome> {
        loop {
            report.record_pass();
            tracing::debug!(run_id = %signal.id(), pass = report.passes, "pass started");
            let visited = match self.drive_pass(signal, list, policy, opts, report).await? {
                PassEnd::Finished { visited } => visited,
                PassEnd::Cancelled => return Ok(RunOutcome::Cancelled),
            };

            let again = policy == RetentionPolicy::Loop
                && visited > 0
                && loop_count.wants_another(report.passes);
            if !again {
                return Ok(RunOutcome::Completed);
            }
        }
    }

    async fn drive_pass(
        &self,
        signal: &RunSignal,
        list: ListKind,
        policy: RetentionPolicy,
        opts: &WaitOptions,
        report: &mut RunReport,
    ) -> Result<PassEnd> {
        let hold = WaitOptions {
            timeout: None,
            ..*opts
        };
        let mut cursor = ListCursor::start();
        let mut visited = 0;

        loop {
            tokio::task::yield_now().await;
            // Observes cancellation and holds while paused.
            match wait_until(|| Ok(true), &hold, signal).await {
                Err(e) if e.is_cancelled() => return Ok(PassEnd::Cancelled),
                other => other?,
            }

            let next = cursor.current(self.lists().get(list));
            let Some(command) = next else {
                return Ok(PassEnd::Finished { visited });
            };

            let result = {
                let mut guard = command.lock().await;
                match list {
                    ListKind::Execute => guard.execute(signal, opts).await,
                    ListKind::Undo => guard.undo(signal, opts).await,
                }
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Ok(PassEnd::Cancelled),
                Err(e) => return Err(e),
            }

            visited = visited.saturating_add(1);
            report.record_command();
            self.retain(signal, list, policy, &mut cursor, &command);
        }
    }

    /// Apply the retention policy to the Command just run. Nothing is moved
    /// once the run has been cancelled, so a concurrent `clear` stays clear.
    fn retain(
        &self,
        signal: &RunSignal,
        list: ListKind,
        policy: RetentionPolicy,
        cursor: &mut ListCursor,
        command: &CommandHandle,
    ) {
        let mut lists = self.lists();
        if signal.is_cancelled() {
            return;
        }
        match policy {
            RetentionPolicy::Keep | RetentionPolicy::Loop => cursor.advance(),
            RetentionPolicy::Delete => {
                cursor.remove_current(lists.get_mut(list), command);
            }
            RetentionPolicy::SendToOtherList => {
                if let Some(moved) = cursor.remove_current(lists.get_mut(list), command) {
                    tracing::debug!(command = %moved.name(), to = %list.other(), "command moved");
                    lists.get_mut(list.other()).insert(0, moved);
                }
            }
        }
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("state", &self.state())
            .field("execute", &self.execute_names())
            .field("undo", &self.undo_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
