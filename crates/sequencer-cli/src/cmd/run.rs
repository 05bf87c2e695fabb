use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use sequencer_core::{
    Action, Command, Condition, ExecutionHost, ExplicitKeys, LoopCount, RetentionPolicy,
    RunOutcome, RunReport, Sequence, SequenceConfig,
};
use sequencer_shell::{ShellCommand, ShellHost};

use crate::output::{print_json, print_reports};

#[derive(Args)]
pub struct RunArgs {
    /// YAML sequence config (policy, loop_count, poll/grace/timeout settings)
    #[arg(long, env = "SEQR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Retention policy: keep, delete, send-to-other-list, loop
    #[arg(long)]
    pub policy: Option<RetentionPolicy>,

    /// Loop passes under the loop policy (0 = once, -1 = until interrupted)
    #[arg(long, allow_hyphen_values = true)]
    pub loops: Option<i64>,

    /// Delay before each step starts
    #[arg(long, value_name = "MS")]
    pub entry_delay_ms: Option<u64>,

    /// Delay after each step finishes before the next one
    #[arg(long, value_name = "MS")]
    pub exit_delay_ms: Option<u64>,

    /// Follow the execute pass with an undo pass (implies send-to-other-list
    /// unless --policy or the config file sets a policy)
    #[arg(long)]
    pub undo: bool,

    /// Maximum shell steps running at once
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Steps as "<do>" or "<do> :: <undo>"
    pub steps: Vec<String>,
}

/// A parsed `"<do> :: <undo>"` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub execute: String,
    pub undo: Option<String>,
}

pub fn parse_step(raw: &str) -> anyhow::Result<Step> {
    let (execute, undo) = match raw.split_once("::") {
        Some((execute, undo)) => (execute.trim(), Some(undo.trim())),
        None => (raw.trim(), None),
    };
    if execute.is_empty() {
        bail!("step '{raw}' has no command to run");
    }
    Ok(Step {
        execute: execute.to_string(),
        undo: undo.filter(|u| !u.is_empty()).map(str::to_string),
    })
}

/// Gate timings applied to every step.
#[derive(Debug, Clone, Copy, Default)]
struct Delays {
    entry: Option<Duration>,
    exit: Option<Duration>,
}

impl Delays {
    fn apply(self, mut action: Action) -> Action {
        if let Some(d) = self.entry {
            action = action.with_entry(Condition::timed_wait(d));
        }
        if let Some(d) = self.exit {
            action = action.with_exit(Condition::timed_wait(d));
        }
        action
    }
}

impl Step {
    fn into_command(self, host: &Arc<dyn ExecutionHost>, delays: Delays) -> Command {
        let execute = delays.apply(ShellCommand::new(self.execute).into_action(Arc::clone(host)));
        let command = Command::new(execute);
        match self.undo {
            Some(undo) => command.with_undo(
                delays.apply(ShellCommand::new(undo).into_action(Arc::clone(host))),
            ),
            None => command,
        }
    }
}

pub fn resolve_config(args: &RunArgs) -> anyhow::Result<SequenceConfig> {
    let (mut config, explicit) = match &args.config {
        Some(path) => SequenceConfig::load_explicit(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => (SequenceConfig::default(), ExplicitKeys::default()),
    };
    match args.policy {
        Some(policy) => config.policy = policy,
        None if args.undo && !explicit.policy => {
            config.policy = RetentionPolicy::SendToOtherList
        }
        None => {}
    }
    if let Some(n) = args.loops {
        config.loop_count = LoopCount::try_from(n)?;
    }
    config.validate()?;
    Ok(config)
}

pub fn run(args: RunArgs, json: bool) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;
    let steps = args
        .steps
        .iter()
        .map(|s| parse_step(s))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let delays = Delays {
        entry: args.entry_delay_ms.map(Duration::from_millis),
        exit: args.exit_delay_ms.map(Duration::from_millis),
    };

    let rt = tokio::runtime::Runtime::new()?;
    let reports = rt.block_on(drive(config, steps, delays, args.undo, args.jobs))?;

    if json {
        print_json(&reports)?;
    } else {
        print_reports(&reports);
    }

    if reports.iter().any(|r| r.outcome == RunOutcome::Cancelled) {
        bail!("run cancelled");
    }
    Ok(())
}

async fn drive(
    config: SequenceConfig,
    steps: Vec<Step>,
    delays: Delays,
    undo: bool,
    jobs: usize,
) -> anyhow::Result<Vec<RunReport>> {
    let host: Arc<dyn ExecutionHost> = Arc::new(ShellHost::new(jobs));
    let sequence = Sequence::with_config(config);
    for step in steps {
        sequence.add_command(step.into_command(&host, delays));
    }

    let interrupt = {
        let sequence = sequence.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted; killing the active run");
                sequence.kill();
            }
        })
    };

    let result = passes(&sequence, undo).await;
    interrupt.abort();
    result
}

async fn passes(sequence: &Sequence, undo: bool) -> anyhow::Result<Vec<RunReport>> {
    let mut reports = Vec::new();
    let report = sequence
        .execute_sequence(None, None)
        .await
        .context("execute pass failed")?;
    let completed = report.outcome == RunOutcome::Completed;
    reports.push(report);

    if undo && completed {
        let report = sequence
            .undo_sequence(None, None)
            .await
            .context("undo pass failed")?;
        reports.push(report);
    }
    Ok(reports)
}
