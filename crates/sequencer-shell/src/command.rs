use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use futures::FutureExt;
use sequencer_core::{Action, ExecutionHost, ProcessFactory, Routine};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::{Result, ShellError};

// ─── ShellCommand ─────────────────────────────────────────────────────────

/// A shell line run as `sh -c <line>`.
///
/// Each call to [`run`](Self::run) spawns a fresh subprocess. Stdout and
/// stderr are streamed line by line to `tracing`; stderr is also collected
/// and surfaced in the error when the process exits non-zero. The child is
/// killed if the future running it is dropped.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    line: String,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    /// Spawn the line and wait for it to exit.
    pub async fn run(&self) -> Result<()> {
        let mut child = self.build().spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, stderr) = tokio::join!(
            drain(stdout, &self.line, Stream::Stdout),
            drain(stderr, &self.line, Stream::Stderr),
        );

        let status = child.wait().await?;
        if status.success() {
            tracing::debug!(command = %self.line, "shell step succeeded");
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(ShellError::Exit {
                command: self.line.clone(),
                code,
                stderr,
            }),
            None => Err(ShellError::Signal {
                command: self.line.clone(),
                stderr,
            }),
        }
    }

    /// One routine instance for a process-backed Action.
    pub fn routine(&self) -> Routine {
        let cmd = self.clone();
        async move { cmd.run().await.map_err(Into::into) }.boxed()
    }

    pub fn into_factory(self) -> ProcessFactory {
        Arc::new(move || self.routine())
    }

    /// A process-backed Action named after the shell line.
    pub fn into_action(self, host: Arc<dyn ExecutionHost>) -> Action {
        let name = self.line.clone();
        Action::process(move || self.routine(), host).named(name)
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Log every line of `pipe`; stderr lines are also returned joined.
///
/// Reads to EOF so the child never sees a closed pipe. Bytes that are not
/// UTF-8 are replaced rather than ending the read.
async fn drain<R>(pipe: Option<R>, command: &str, stream: Stream) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(pipe) = pipe else {
        return captured;
    };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(command = %command, ?stream, error = %e, "stopped reading output");
                break;
            }
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        match stream {
            Stream::Stdout => tracing::info!(command = %command, "{line}"),
            Stream::Stderr => {
                tracing::warn!(command = %command, "{line}");
                if !captured.is_empty() {
                    captured.push('\n');
                }
                captured.push_str(line);
            }
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequencer_core::{Command as SeqCommand, RunSignal, SequencerError, TokioHost, WaitOptions};
    use std::time::Duration;

    #[tokio::test]
    async fn zero_exit_is_success() {
        ShellCommand::new("echo hello").run().await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_reports_code_and_stderr() {
        let err = ShellCommand::new("echo 'valve jammed' >&2; exit 3")
            .run()
            .await
            .unwrap_err();
        match &err {
            ShellError::Exit { code, stderr, .. } => {
                assert_eq!(*code, 3);
                assert_eq!(stderr, "valve jammed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("exited with code 3"));
        assert!(msg.contains("stderr: valve jammed"));
    }

    #[tokio::test]
    async fn non_utf8_output_does_not_break_the_step() {
        let line = "printf '\\377\\n'; i=0; while [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done";
        ShellCommand::new(line).run().await.unwrap();

        let err = ShellCommand::new("printf 'bad \\377\\n' >&2; exit 2")
            .run()
            .await
            .unwrap_err();
        match err {
            ShellError::Exit { code, stderr, .. } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "bad \u{FFFD}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cwd_and_env_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        ShellCommand::new("printf '%s' \"$MARK\" > out.txt")
            .current_dir(dir.path())
            .env("MARK", "armed")
            .run()
            .await
            .unwrap();
        let written = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(written, "armed");
    }

    #[tokio::test]
    async fn routine_errors_convert_to_process_errors() {
        let err = ShellCommand::new("exit 7").routine().await.unwrap_err();
        assert!(matches!(err, SequencerError::Process(ref m) if m.contains("code 7")));
    }

    #[tokio::test]
    async fn dropping_the_routine_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let line = format!("sleep 0.3 && touch {}", marker.display());
        let res = tokio::time::timeout(
            Duration::from_millis(50),
            ShellCommand::new(line).routine(),
        )
        .await;
        assert!(res.is_err(), "routine should still be running");

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn shell_action_runs_inside_a_command() {
        let dir = tempfile::tempdir().unwrap();
        let action = ShellCommand::new("touch done")
            .current_dir(dir.path())
            .into_action(Arc::new(TokioHost));
        assert_eq!(action.name(), "touch done");

        let mut cmd = SeqCommand::new(action);
        let opts = WaitOptions {
            poll_interval: Duration::from_millis(2),
            timeout: Some(Duration::from_secs(5)),
        };
        cmd.execute(&RunSignal::detached(), &opts).await.unwrap();
        assert!(dir.path().join("done").exists());
    }
}
