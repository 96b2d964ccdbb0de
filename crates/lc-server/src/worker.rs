//! Stream worker: supervises one ffmpeg process.
//!
//! The worker runs on its own tokio task. It announces the masked command
//! line, spawns the child, relays every stdout/stderr line through a bounded
//! channel and finishes with a terminal line and a [`WorkerOutcome`]. It
//! never retries. Cancellation goes to the child it owns: `q` on stdin first,
//! then a kill once the grace period runs out.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lc_av::ToolCommand;
use lc_core::events::LogSource;
use lc_core::RunId;

/// Capacity of the worker -> session channel.
pub const CHANNEL_CAPACITY: usize = 256;

/// How long pipe readers may keep draining after the child is gone.
const READER_DRAIN: Duration = Duration::from_secs(2);

/// Lifecycle of a stream worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopped,
    Exited,
}

impl WorkerState {
    /// Whether a worker in this state still owns a live (or launching) child.
    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running)
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The child exited by itself.
    Exited { code: Option<i32>, success: bool },
    /// The child was terminated by a stop request.
    Stopped,
    /// The child could not be launched.
    SpawnFailed(String),
}

/// Messages from the worker to whoever owns the receiving end.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Spawned { pid: Option<u32> },
    Line { source: LogSource, text: String },
    Finished(WorkerOutcome),
}

/// A configured, not yet started, worker.
pub struct Worker {
    run_id: RunId,
    command: ToolCommand,
    secret: String,
    grace: Duration,
}

/// Handle to a running worker task.
pub struct WorkerHandle {
    pub run_id: RunId,
    cancel: CancellationToken,
    task: JoinHandle<WorkerOutcome>,
}

impl WorkerHandle {
    /// Ask the worker to terminate its child. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker task to end.
    ///
    /// A task that panicked or was aborted counts as an abnormal exit.
    pub async fn join(self) -> WorkerOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, "Worker task failed: {e}");
                WorkerOutcome::Exited {
                    code: None,
                    success: false,
                }
            }
        }
    }
}

impl Worker {
    /// `secret` is masked out of the echoed command line.
    pub fn new(run_id: RunId, command: ToolCommand, secret: impl Into<String>, grace: Duration) -> Self {
        Self {
            run_id,
            command,
            secret: secret.into(),
            grace,
        }
    }

    /// Start the worker on its own task.
    pub fn spawn(self, tx: mpsc::Sender<WorkerEvent>) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let run_id = self.run_id;
        let task = tokio::spawn(self.run(tx, cancel.clone()));
        WorkerHandle { run_id, cancel, task }
    }

    async fn run(self, tx: mpsc::Sender<WorkerEvent>, cancel: CancellationToken) -> WorkerOutcome {
        let run_id = self.run_id;
        let rendered = self.command.render_masked(&self.secret);
        tracing::info!(run_id = %run_id, "Launching: {rendered}");
        supervisor_line(&tx, format!("Running: {rendered}")).await;

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(run_id = %run_id, "Failed to launch encoder: {e}");
                supervisor_line(&tx, format!("Error: {e}")).await;
                let outcome = WorkerOutcome::SpawnFailed(e.to_string());
                finish(&tx, outcome.clone()).await;
                return outcome;
            }
        };

        let pid = child.id();
        tracing::debug!(run_id = %run_id, pid = ?pid, "Encoder spawned");
        let _ = tx.send(WorkerEvent::Spawned { pid }).await;

        let readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(pump_lines(out, LogSource::Stdout, tx.clone()))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(pump_lines(err, LogSource::Stderr, tx.clone()))),
        ]
        .into_iter()
        .flatten()
        .collect();
        let stdin = child.stdin.take();

        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WorkerOutcome::Exited {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    supervisor_line(&tx, format!("Error: failed waiting for encoder: {e}")).await;
                    WorkerOutcome::Exited { code: None, success: false }
                }
            },
            _ = cancel.cancelled() => {
                terminate(&mut child, stdin, self.grace).await;
                WorkerOutcome::Stopped
            }
        };

        for reader in readers {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
                tracing::debug!(run_id = %run_id, "Pipe reader still open after exit; aborting");
                abort.abort();
            }
        }

        match &outcome {
            WorkerOutcome::Exited { code, success } => {
                tracing::info!(run_id = %run_id, code = ?code, success, "Encoder exited");
            }
            WorkerOutcome::Stopped => tracing::info!(run_id = %run_id, "Encoder stopped"),
            WorkerOutcome::SpawnFailed(_) => {}
        }

        finish(&tx, outcome.clone()).await;
        outcome
    }
}

/// Ask ffmpeg to quit via stdin, then kill it if it is still alive after
/// `grace`.
async fn terminate(child: &mut Child, stdin: Option<ChildStdin>, grace: Duration) {
    if let Some(mut stdin) = stdin {
        let _ = stdin.write_all(b"q\n").await;
        let _ = stdin.flush().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill encoder: {e}");
            }
        }
    }
}

/// Terminal line for the panel, then the outcome itself.
async fn finish(tx: &mpsc::Sender<WorkerEvent>, outcome: WorkerOutcome) {
    let detail = match &outcome {
        WorkerOutcome::Exited { code: Some(code), .. } => format!("exit code {code}"),
        WorkerOutcome::Exited { code: None, .. } => "terminated by signal".to_string(),
        WorkerOutcome::Stopped => "stopped".to_string(),
        WorkerOutcome::SpawnFailed(_) => "launch failed".to_string(),
    };
    supervisor_line(tx, format!("Streaming finished or stopped ({detail}).")).await;
    let _ = tx.send(WorkerEvent::Finished(outcome)).await;
}

async fn supervisor_line(tx: &mpsc::Sender<WorkerEvent>, text: String) {
    let _ = tx
        .send(WorkerEvent::Line {
            source: LogSource::Supervisor,
            text,
        })
        .await;
}

/// Forward every line of `reader` as it arrives.
///
/// ffmpeg rewrites its progress line with `\r`, so both `\r` and `\n` end a
/// line. Blank lines are skipped and trailing whitespace is trimmed.
async fn pump_lines<R>(reader: R, source: LogSource, tx: mpsc::Sender<WorkerEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let (lines, consumed) = {
            let buf = match reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    tracing::debug!("Pipe read error on {source:?}: {e}");
                    break;
                }
            };
            if buf.is_empty() {
                break;
            }
            let mut lines = Vec::new();
            for &byte in buf {
                if byte == b'\n' || byte == b'\r' {
                    if let Some(line) = take_line(&mut pending) {
                        lines.push(line);
                    }
                } else {
                    pending.push(byte);
                }
            }
            (lines, buf.len())
        };
        reader.consume(consumed);

        for text in lines {
            if tx.send(WorkerEvent::Line { source, text }).await.is_err() {
                return;
            }
        }
    }

    if let Some(text) = take_line(&mut pending) {
        let _ = tx.send(WorkerEvent::Line { source, text }).await;
    }
}

fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let text = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn collect(mut rx: mpsc::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn texts(events: &[WorkerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Line { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn shell(script: &str) -> ToolCommand {
        let mut cmd = ToolCommand::new(PathBuf::from("sh"));
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn relays_both_pipes_and_ends_with_terminal_line() {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = Worker::new(
            RunId::new(),
            shell("echo one; echo two 1>&2; exit 3"),
            "",
            Duration::from_millis(100),
        );
        let handle = worker.spawn(tx);
        let events = collect(rx).await;
        let outcome = handle.join().await;

        assert_eq!(outcome, WorkerOutcome::Exited { code: Some(3), success: false });

        let lines = texts(&events);
        assert!(lines[0].starts_with("Running: sh -c"));
        assert!(lines.contains(&"one".to_string()));
        assert!(lines.contains(&"two".to_string()));
        assert!(lines.last().unwrap().contains("exit code 3"));

        assert!(matches!(events[1], WorkerEvent::Spawned { pid: Some(_) }));
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Finished(WorkerOutcome::Exited { .. }))
        ));
    }

    #[tokio::test]
    async fn carriage_returns_split_lines() {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = Worker::new(
            RunId::new(),
            shell("printf 'frame=1\\rframe=2\\r\\n\\ndone'"),
            "",
            Duration::from_millis(100),
        );
        let handle = worker.spawn(tx);
        let lines = texts(&collect(rx).await);
        handle.join().await;

        let body: Vec<&String> = lines.iter().skip(1).take(3).collect();
        assert_eq!(body, vec!["frame=1", "frame=2", "done"]);
    }

    #[tokio::test]
    async fn masks_secret_in_echoed_command() {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = Worker::new(
            RunId::new(),
            shell("exit 0 # rtmp://host/live2/TOPSECRET"),
            "TOPSECRET",
            Duration::from_millis(100),
        );
        let handle = worker.spawn(tx);
        let lines = texts(&collect(rx).await);
        assert_eq!(
            handle.join().await,
            WorkerOutcome::Exited { code: Some(0), success: true }
        );
        assert!(lines.iter().all(|l| !l.contains("TOPSECRET")));
        assert!(lines[0].contains("live2/****"));
    }

    #[tokio::test]
    async fn spawn_failure_is_logged_not_raised() {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cmd = ToolCommand::new(PathBuf::from("nonexistent_encoder_xyz_12345"));
        let handle = Worker::new(RunId::new(), cmd, "", Duration::from_millis(100)).spawn(tx);
        let events = collect(rx).await;

        assert!(matches!(handle.join().await, WorkerOutcome::SpawnFailed(_)));
        let lines = texts(&events);
        assert!(lines.iter().any(|l| l.starts_with("Error:")));
        assert!(lines.last().unwrap().contains("launch failed"));
        assert!(!events.iter().any(|e| matches!(e, WorkerEvent::Spawned { .. })));
    }

    #[tokio::test]
    async fn cancel_terminates_long_running_child() {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut cmd = ToolCommand::new(PathBuf::from("sleep"));
        cmd.arg("30");
        let handle = Worker::new(RunId::new(), cmd, "", Duration::from_millis(200)).spawn(tx);

        // Wait until the child exists.
        loop {
            match rx.recv().await {
                Some(WorkerEvent::Spawned { .. }) => break,
                Some(_) => continue,
                None => panic!("worker ended before spawning"),
            }
        }

        handle.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(10), handle.join())
            .await
            .expect("worker did not stop in time");
        assert_eq!(outcome, WorkerOutcome::Stopped);

        let rest = collect(rx).await;
        assert!(texts(&rest).last().unwrap().contains("(stopped)"));
    }

    #[test]
    fn active_states() {
        assert!(WorkerState::Starting.is_active());
        assert!(WorkerState::Running.is_active());
        assert!(!WorkerState::Idle.is_active());
        assert!(!WorkerState::Stopped.is_active());
        assert!(!WorkerState::Exited.is_active());
    }

    #[tokio::test]
    async fn aborted_task_joins_as_abnormal_exit() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            WorkerOutcome::Stopped
        });
        task.abort();
        let handle = WorkerHandle {
            run_id: RunId::new(),
            cancel: CancellationToken::new(),
            task,
        };
        assert_eq!(
            handle.join().await,
            WorkerOutcome::Exited {
                code: None,
                success: false
            }
        );
    }
}
