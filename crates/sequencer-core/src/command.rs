use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::Result;
use crate::signal::RunSignal;
use crate::wait::{wait_until, WaitOptions};

// ---------------------------------------------------------------------------
// CommandState
// ---------------------------------------------------------------------------

/// Lifecycle of one Execute or Undo call.
///
/// Transitions: `Idle → WaitingForEntryCondition → OnExecute →
/// WaitingForExitCondition → Completed`. A call that observes cancellation
/// ends in `Cancelled`; `Paused` is reported while the run driving the
/// Command is paused at one of its suspend points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Idle,
    WaitingForEntryCondition,
    OnExecute,
    WaitingForExitCondition,
    Completed,
    Paused,
    Cancelled,
}

impl CommandState {
    fn is_suspended(self) -> bool {
        matches!(
            self,
            Self::WaitingForEntryCondition | Self::OnExecute | Self::WaitingForExitCondition
        )
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::WaitingForEntryCondition => "waiting_for_entry_condition",
            Self::OnExecute => "on_execute",
            Self::WaitingForExitCondition => "waiting_for_exit_condition",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// CommandStatus
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Tracker {
    phase: CommandState,
    signal: Option<RunSignal>,
}

/// Readable view of a Command's state, usable while the Command itself is
/// locked by a running sequence.
#[derive(Debug, Clone)]
pub struct CommandStatus {
    tracker: Arc<Mutex<Tracker>>,
}

impl CommandStatus {
    fn new() -> Self {
        Self {
            tracker: Arc::new(Mutex::new(Tracker {
                phase: CommandState::Idle,
                signal: None,
            })),
        }
    }

    pub fn state(&self) -> CommandState {
        match self.tracker.lock() {
            Ok(t) => match &t.signal {
                Some(signal) if t.phase.is_suspended() && signal.is_paused() => {
                    CommandState::Paused
                }
                _ => t.phase,
            },
            Err(_) => CommandState::Idle,
        }
    }

    fn enter(&self, signal: &RunSignal) {
        if let Ok(mut t) = self.tracker.lock() {
            t.signal = Some(signal.clone());
            t.phase = CommandState::WaitingForEntryCondition;
        }
    }

    fn set(&self, phase: CommandState) {
        if let Ok(mut t) = self.tracker.lock() {
            t.phase = phase;
        }
    }

    fn leave(&self, phase: CommandState) {
        if let Ok(mut t) = self.tracker.lock() {
            t.signal = None;
            t.phase = phase;
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Execute,
    Undo,
}

/// An execute Action plus an optional undo Action, driven through the gated
/// lifecycle.
#[derive(Debug)]
pub struct Command {
    name: String,
    execute: Option<Action>,
    undo: Option<Action>,
    status: CommandStatus,
}

impl Command {
    /// The Command takes its display name from `execute`.
    pub fn new(execute: Action) -> Self {
        Self::from_parts(Some(execute), None)
    }

    pub fn with_undo(mut self, undo: Action) -> Self {
        self.undo = Some(undo);
        self
    }

    pub fn from_parts(execute: Option<Action>, undo: Option<Action>) -> Self {
        let name = execute
            .as_ref()
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        Self {
            name,
            execute,
            undo,
            status: CommandStatus::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CommandState {
        self.status.state()
    }

    pub fn status(&self) -> CommandStatus {
        self.status.clone()
    }

    pub fn has_undo(&self) -> bool {
        self.undo.is_some()
    }

    pub async fn execute(&mut self, signal: &RunSignal, opts: &WaitOptions) -> Result<()> {
        self.drive(Direction::Execute, signal, opts).await
    }

    pub async fn undo(&mut self, signal: &RunSignal, opts: &WaitOptions) -> Result<()> {
        self.drive(Direction::Undo, signal, opts).await
    }

    async fn drive(
        &mut self,
        direction: Direction,
        signal: &RunSignal,
        opts: &WaitOptions,
    ) -> Result<()> {
        let action = match direction {
            Direction::Execute => self.execute.as_mut(),
            Direction::Undo => self.undo.as_mut(),
        };
        let Some(action) = action else {
            tracing::warn!(command = %self.name, ?direction, "no action to run; skipping");
            return Ok(());
        };

        let outcome = pass_through_gate(action, &self.status, &self.name, signal, opts).await;
        match outcome {
            Ok(()) => {
                action.finish();
                self.status.leave(CommandState::Completed);
                tracing::debug!(command = %self.name, ?direction, "completed");
                Ok(())
            }
            Err(e) => {
                action.reset();
                let phase = if e.is_cancelled() {
                    CommandState::Cancelled
                } else {
                    CommandState::Idle
                };
                self.status.leave(phase);
                tracing::debug!(command = %self.name, ?direction, error = %e, "stopped");
                Err(e)
            }
        }
    }
}

/// Steps one Action through entry gate, work and exit gate. The exit
/// condition is armed only after the entry condition held and the work
/// reported completion.
async fn pass_through_gate(
    action: &mut Action,
    status: &CommandStatus,
    name: &str,
    signal: &RunSignal,
    opts: &WaitOptions,
) -> Result<()> {
    status.enter(signal);
    tracing::debug!(command = %name, state = %CommandState::WaitingForEntryCondition);
    let entry = action.gate_mut().entry_mut();
    entry.arm();
    wait_until(|| entry.statement(), opts, signal).await?;

    status.set(CommandState::OnExecute);
    tracing::debug!(command = %name, state = %CommandState::OnExecute);
    action.fire_start();
    action.invoke()?;
    {
        // Move the borrow in: `Action` is `Send` but not `Sync`.
        let work = &mut *action;
        wait_until(move || work.completion(), opts, signal).await?;
    }

    status.set(CommandState::WaitingForExitCondition);
    tracing::debug!(command = %name, state = %CommandState::WaitingForExitCondition);
    let exit = action.gate_mut().exit_mut();
    exit.arm();
    wait_until(|| exit.statement(), opts, signal).await
}

// ---------------------------------------------------------------------------
// CommandHandle
// ---------------------------------------------------------------------------

/// A Command shared between a Sequence's lists and its run loop.
///
/// Name and state are readable without waiting for the Command lock, which
/// the run loop holds for the whole of an Execute or Undo call.
#[derive(Clone)]
pub struct CommandHandle {
    name: Arc<str>,
    status: CommandStatus,
    inner: Arc<tokio::sync::Mutex<Command>>,
}

impl CommandHandle {
    pub fn new(command: Command) -> Self {
        Self {
            name: Arc::from(command.name()),
            status: command.status(),
            inner: Arc::new(tokio::sync::Mutex::new(command)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CommandState {
        self.status.state()
    }

    pub fn ptr_eq(&self, other: &CommandHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Command> {
        self.inner.lock().await
    }
}

impl From<Command> for CommandHandle {
    fn from(command: Command) -> Self {
        Self::new(command)
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
