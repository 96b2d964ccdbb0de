//! Stream session controller.
//!
//! [`SessionController`] owns the single streaming session of the process:
//! the current worker, its run metadata and the ring of recent log lines.
//! All mutable state sits behind one `parking_lot::Mutex` that is never held
//! across an `.await`.
//!
//! A relay task per run drains the worker channel into the log ring and the
//! [`EventBus`], and drives the state machine
//! `Idle -> Starting -> Running -> Stopped | Exited`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lc_av::command::MASK;
use lc_av::{build_command, stage_playlist, StreamConfig, StreamInput, ToolRegistry};
use lc_core::config::{Config, MediaConfig, StreamSettings};
use lc_core::events::{EventBus, EventPayload, LogBuffer, LogLine};
use lc_core::RunId;

use crate::media;
use crate::worker::{Worker, WorkerEvent, WorkerHandle, WorkerOutcome, WorkerState, CHANNEL_CAPACITY};

/// What a successful start launched.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct StreamSummary {
    #[schema(value_type = String)]
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    /// Media file names in playback order.
    pub media: Vec<String>,
    pub shorts: bool,
    /// Masked destination key.
    pub key: String,
    /// Concat manifest, in multi-video mode.
    pub playlist: Option<String>,
}

/// Snapshot of the session for the panel.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SessionStatus {
    pub state: WorkerState,
    /// Whether the user wants a stream running.
    pub active: bool,
    pub pid: Option<u32>,
    /// The current or most recent run.
    pub current: Option<StreamSummary>,
    /// Recent log lines, oldest first.
    pub logs: Vec<LogLine>,
}

/// Result of a stop request.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct StopReport {
    /// Whether a running worker was terminated.
    pub stopped: bool,
    #[schema(value_type = Option<String>)]
    pub run_id: Option<RunId>,
    /// Whether the scratch file existed and was removed.
    pub cleanup_removed: bool,
}

struct RunHandle {
    worker: WorkerHandle,
    relay: JoinHandle<()>,
}

struct SessionState {
    state: WorkerState,
    active: bool,
    pid: Option<u32>,
    current: Option<StreamSummary>,
    handle: Option<RunHandle>,
    log: LogBuffer,
}

/// Controller for the process-wide streaming session.
pub struct SessionController {
    settings: StreamSettings,
    media: MediaConfig,
    tools: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
    inner: Arc<Mutex<SessionState>>,
    auto_started: AtomicBool,
}

impl SessionController {
    pub fn new(config: &Config, tools: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        let log = LogBuffer::new(config.stream.log_capacity);
        Self {
            settings: config.stream.clone(),
            media: config.media.clone(),
            tools,
            event_bus,
            inner: Arc::new(Mutex::new(SessionState {
                state: WorkerState::Idle,
                active: false,
                pid: None,
                current: None,
                handle: None,
                log,
            })),
            auto_started: AtomicBool::new(false),
        }
    }

    /// Validate `request` and launch a worker for it.
    ///
    /// # Errors
    ///
    /// - [`lc_core::Error::Validation`] for missing media or key, a key that
    ///   fails the credential policy, or media that cannot be resolved.
    /// - [`lc_core::Error::Tool`] when ffmpeg is not available.
    /// - [`lc_core::Error::Conflict`] while another worker is starting or
    ///   running.
    pub fn start(&self, request: StreamConfig) -> lc_core::Result<StreamSummary> {
        request.validate()?;
        if self.settings.validate_key {
            request.key.check_policy()?;
        }
        let media = request
            .media
            .iter()
            .map(|reference| media::resolve_media(&self.media, reference))
            .collect::<lc_core::Result<Vec<_>>>()?;
        let ffmpeg = self.tools.require("ffmpeg")?.path.clone();
        // Written before locking; only the rename into place happens under it.
        let staged = if request.needs_playlist() {
            Some(stage_playlist(&self.settings.playlist_path, &media)?)
        } else {
            None
        };

        let mut st = self.inner.lock();
        if st.state.is_active() {
            let run = st
                .current
                .as_ref()
                .map(|c| c.run_id.to_string())
                .unwrap_or_default();
            return Err(lc_core::Error::Conflict(format!(
                "stream {run} is already running; stop it first"
            )));
        }
        // A finished worker from an earlier run is reaped here.
        st.handle = None;

        let input = match staged {
            Some(playlist) => StreamInput::Playlist(playlist.commit()?),
            None => StreamInput::File(media[0].clone()),
        };
        let command = build_command(&ffmpeg, &self.settings, &input, request.shorts, &request.key);

        let run_id = RunId::new();
        let names: Vec<String> = media.iter().map(|p| display_name(p)).collect();
        let summary = StreamSummary {
            run_id,
            started_at: Utc::now(),
            media: names.clone(),
            shorts: request.shorts,
            key: request.key.masked(),
            playlist: match &input {
                StreamInput::Playlist(path) => Some(path.display().to_string()),
                StreamInput::File(_) => None,
            },
        };

        st.state = WorkerState::Starting;
        st.active = true;
        st.pid = None;
        st.current = Some(summary.clone());

        tracing::info!(
            run_id = %run_id,
            media = ?names,
            shorts = request.shorts,
            key = %request.key,
            "Starting stream"
        );
        self.event_bus.broadcast(EventPayload::StreamStarting {
            run_id,
            media: names,
            shorts: request.shorts,
        });

        let secret = request.key.expose().to_string();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = Worker::new(
            run_id,
            command,
            secret.clone(),
            Duration::from_secs(self.settings.stop_grace_secs),
        )
        .spawn(tx);
        let relay = tokio::spawn(relay(
            run_id,
            secret,
            rx,
            self.inner.clone(),
            self.event_bus.clone(),
        ));
        st.handle = Some(RunHandle { worker, relay });

        Ok(summary)
    }

    /// Stop the current worker, if any, and remove the scratch file.
    ///
    /// Safe to call at any time; with nothing running only the cleanup
    /// happens. Of several concurrent calls only the one that takes the
    /// worker reports it stopped.
    pub async fn stop(&self) -> StopReport {
        let (handle, was_active, run_id) = {
            let mut st = self.inner.lock();
            st.active = false;
            let handle = st.handle.take();
            let was_active = handle.is_some() && st.state.is_active();
            let run_id = st.current.as_ref().map(|c| c.run_id);
            (handle, was_active, run_id)
        };

        if let Some(run) = handle {
            run.worker.cancel();
            let outcome = run.worker.join().await;
            tracing::debug!(run_id = ?run_id, outcome = ?outcome, "Worker joined");
            if let Err(e) = run.relay.await {
                tracing::warn!("Log relay task failed: {e}");
            }
        }

        let cleanup_removed = remove_cleanup_file(&self.settings.cleanup_file).await;

        if was_active {
            tracing::info!(run_id = ?run_id, "Stream stopped");
        } else {
            tracing::debug!("Stop requested with no active stream");
        }

        StopReport {
            stopped: was_active,
            run_id: if was_active { run_id } else { None },
            cleanup_removed,
        }
    }

    pub fn status(&self) -> SessionStatus {
        let st = self.inner.lock();
        SessionStatus {
            state: st.state,
            active: st.active,
            pid: st.pid,
            current: st.current.clone(),
            logs: st.log.tail(st.log.capacity()),
        }
    }

    /// The last `limit` log lines, oldest first.
    pub fn logs(&self, limit: usize) -> Vec<LogLine> {
        self.inner.lock().log.tail(limit)
    }

    /// Start `request` unless an automatic start already happened in this
    /// process. Returns `Ok(None)` when the one-shot was already used.
    pub fn try_auto_start(&self, request: StreamConfig) -> lc_core::Result<Option<StreamSummary>> {
        if self.auto_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Auto-start already consumed");
            return Ok(None);
        }
        self.start(request).map(Some)
    }
}

/// Drain one run's worker channel into the session and the event bus.
async fn relay(
    run_id: RunId,
    secret: String,
    mut rx: mpsc::Receiver<WorkerEvent>,
    inner: Arc<Mutex<SessionState>>,
    event_bus: Arc<EventBus>,
) {
    let is_current = |st: &SessionState| st.current.as_ref().map(|c| c.run_id) == Some(run_id);

    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Spawned { pid } => {
                {
                    let mut st = inner.lock();
                    if is_current(&*st) {
                        st.state = WorkerState::Running;
                        st.pid = pid;
                    }
                }
                event_bus.broadcast(EventPayload::StreamRunning { run_id, pid });
            }
            WorkerEvent::Line { source, text } => {
                let text = if secret.is_empty() {
                    text
                } else {
                    text.replace(&secret, MASK)
                };
                tracing::trace!(run_id = %run_id, source = ?source, "{text}");
                let line = inner.lock().log.push(Some(run_id), source, text);
                event_bus.broadcast(EventPayload::StreamLog { line });
            }
            WorkerEvent::Finished(outcome) => {
                let (state, payload) = match outcome {
                    WorkerOutcome::Exited { code, success } => (
                        WorkerState::Exited,
                        EventPayload::StreamExited {
                            run_id,
                            code,
                            success,
                        },
                    ),
                    WorkerOutcome::Stopped => {
                        (WorkerState::Stopped, EventPayload::StreamStopped { run_id })
                    }
                    WorkerOutcome::SpawnFailed(error) => (
                        WorkerState::Exited,
                        EventPayload::StreamFailed {
                            run_id,
                            error: error.replace(&secret, MASK),
                        },
                    ),
                };
                {
                    let mut st = inner.lock();
                    if is_current(&*st) {
                        st.state = state;
                        st.pid = None;
                        st.active = false;
                    }
                }
                event_bus.broadcast(payload);
            }
        }
    }
}

async fn remove_cleanup_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {e}", path.display());
            false
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use lc_core::events::LogSource;
    use lc_core::Error;

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let media_dir = dir.path().join("media");
            std::fs::create_dir(&media_dir).unwrap();
            std::fs::write(media_dir.join("a.mp4"), b"a").unwrap();
            std::fs::write(media_dir.join("b.mp4"), b"b").unwrap();

            let mut config = Config::default();
            config.media.dir = media_dir;
            config.stream.playlist_path = dir.path().join("playlist.txt");
            config.stream.cleanup_file = dir.path().join("temp_video.mp4");
            config.stream.stop_grace_secs = 1;
            Self { dir, config }
        }

        fn controller(&self, tools: ToolRegistry) -> SessionController {
            SessionController::new(&self.config, Arc::new(tools), Arc::new(EventBus::default()))
        }

        /// A stand-in encoder: echoes its arguments, then runs `tail`.
        #[cfg(unix)]
        fn fake_ffmpeg(&self, tail: &str) -> ToolRegistry {
            use std::os::unix::fs::PermissionsExt;

            let path = self.dir.path().join("fake-ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\necho \"fake encoder $*\"\n{tail}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            ToolRegistry::default().with_tool("ffmpeg", path)
        }
    }

    async fn wait_for(ctrl: &SessionController, want: WorkerState) {
        for _ in 0..200 {
            if ctrl.status().state == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("session never reached {want:?}; now {:?}", ctrl.status().state);
    }

    #[tokio::test]
    async fn empty_media_or_key_spawns_nothing() {
        let fx = Fixture::new();
        let ctrl = fx.controller(ToolRegistry::default().with_tool("ffmpeg", "/bin/false"));

        let err = ctrl.start(StreamConfig::new(vec![], "XYZ", false)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let err = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "", false))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let status = ctrl.status();
        assert_eq!(status.state, WorkerState::Idle);
        assert!(status.current.is_none());
        assert!(status.logs.is_empty());
    }

    #[tokio::test]
    async fn key_policy_is_enforced_before_launch() {
        let fx = Fixture::new();
        let ctrl = fx.controller(ToolRegistry::default().with_tool("ffmpeg", "/bin/false"));
        let err = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "ab/cd?x=1", false))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(ctrl.status().state, WorkerState::Idle);
    }

    #[tokio::test]
    async fn unknown_media_is_rejected() {
        let fx = Fixture::new();
        let ctrl = fx.controller(ToolRegistry::default().with_tool("ffmpeg", "/bin/false"));
        let err = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("missing.mp4")], "XYZ", false))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn missing_ffmpeg_is_a_tool_error() {
        let fx = Fixture::new();
        let ctrl = fx.controller(ToolRegistry::default());
        let err = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "XYZ", false))
            .unwrap_err();
        assert_eq!(err.http_status(), 502);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let fx = Fixture::new();
        let ctrl = fx.controller(ToolRegistry::default());

        let report = ctrl.stop().await;
        assert!(!report.stopped);
        assert!(report.run_id.is_none());
        assert!(!report.cleanup_removed);

        // Twice is fine too, and the scratch file goes away.
        std::fs::write(&fx.config.stream.cleanup_file, b"x").unwrap();
        let report = ctrl.stop().await;
        assert!(report.cleanup_removed);
        assert!(!fx.config.stream.cleanup_file.exists());
        assert_eq!(ctrl.status().state, WorkerState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn single_video_lifecycle() {
        let fx = Fixture::new();
        let ctrl = fx.controller(fx.fake_ffmpeg("exec sleep 30"));

        let summary = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "SECRETKEY123", false))
            .unwrap();
        assert_eq!(summary.media, vec!["a.mp4"]);
        assert!(summary.playlist.is_none());
        assert_eq!(summary.key, "****Y123");
        assert!(!fx.config.stream.playlist_path.exists());

        wait_for(&ctrl, WorkerState::Running).await;
        assert!(ctrl.status().pid.is_some());

        let err = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("b.mp4")], "SECRETKEY123", false))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let report = ctrl.stop().await;
        assert!(report.stopped);
        assert_eq!(report.run_id, Some(summary.run_id));

        let status = ctrl.status();
        assert_eq!(status.state, WorkerState::Stopped);
        assert!(!status.active);
        assert!(status.pid.is_none());

        let logs = status.logs;
        assert!(logs[0].text.starts_with("Running: "));
        assert_eq!(logs[0].source, LogSource::Supervisor);
        assert!(logs.iter().any(|l| l.text.starts_with("fake encoder")));
        assert!(logs.iter().all(|l| !l.text.contains("SECRETKEY123")));
        assert!(logs.last().unwrap().text.contains("(stopped)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn multi_video_writes_playlist_and_reaps_exited_worker() {
        let fx = Fixture::new();
        let ctrl = fx.controller(fx.fake_ffmpeg("exit 1"));

        let summary = ctrl
            .start(StreamConfig::new(
                vec![PathBuf::from("b.mp4"), PathBuf::from("a.mp4")],
                "XYZ",
                true,
            ))
            .unwrap();
        assert!(summary.playlist.is_some());

        let manifest = std::fs::read_to_string(&fx.config.stream.playlist_path).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("b.mp4'"));
        assert!(lines[1].ends_with("a.mp4'"));

        wait_for(&ctrl, WorkerState::Exited).await;
        let status = ctrl.status();
        assert!(!status.active);
        let fake = status
            .logs
            .iter()
            .find(|l| l.text.starts_with("fake encoder"))
            .unwrap();
        assert!(fake.text.contains("-f concat -safe 0"));
        assert!(fake.text.contains("scale=720:1280"));
        assert!(fake.text.ends_with("-f flv rtmp://a.rtmp.youtube.com/live2/****"));
        assert!(status.logs.last().unwrap().text.contains("exit code 1"));

        // The exited worker does not block a new start.
        let again = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "XYZ", false))
            .unwrap();
        assert_ne!(again.run_id, summary.run_id);
        ctrl.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejected_start_keeps_current_playlist() {
        let fx = Fixture::new();
        let ctrl = fx.controller(fx.fake_ffmpeg("exec sleep 30"));

        ctrl.start(StreamConfig::new(
            vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")],
            "XYZ",
            false,
        ))
        .unwrap();
        let before = std::fs::read_to_string(&fx.config.stream.playlist_path).unwrap();

        let err = ctrl
            .start(StreamConfig::new(
                vec![PathBuf::from("b.mp4"), PathBuf::from("a.mp4")],
                "XYZ",
                false,
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let after = std::fs::read_to_string(&fx.config.stream.playlist_path).unwrap();
        assert_eq!(before, after);
        // No staging files left behind: only media/, playlist.txt and the script.
        let entries = std::fs::read_dir(fx.dir.path()).unwrap().count();
        assert_eq!(entries, 3);

        ctrl.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_stops_report_one_stopped_run() {
        let fx = Fixture::new();
        let ctrl = fx.controller(fx.fake_ffmpeg("exec sleep 30"));

        let summary = ctrl
            .start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "XYZ", false))
            .unwrap();
        wait_for(&ctrl, WorkerState::Running).await;

        let (first, second) = tokio::join!(ctrl.stop(), ctrl.stop());
        let stopped: Vec<_> = [&first, &second].into_iter().filter(|r| r.stopped).collect();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].run_id, Some(summary.run_id));
        assert_eq!(ctrl.status().state, WorkerState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lifecycle_events_reach_the_bus() {
        let fx = Fixture::new();
        let bus = Arc::new(EventBus::default());
        let ctrl = SessionController::new(
            &fx.config,
            Arc::new(fx.fake_ffmpeg("exit 0")),
            bus.clone(),
        );
        let mut rx = bus.subscribe();

        ctrl.start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "XYZ", false))
            .unwrap();

        let mut kinds = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let done = matches!(event.payload, EventPayload::StreamExited { .. });
            kinds.push(event.payload);
            if done {
                break;
            }
        }
        assert!(matches!(kinds[0], EventPayload::StreamStarting { .. }));
        assert!(kinds
            .iter()
            .any(|k| matches!(k, EventPayload::StreamRunning { .. })));
        assert!(kinds.iter().any(|k| matches!(k, EventPayload::StreamLog { .. })));
        assert!(matches!(
            kinds.last(),
            Some(EventPayload::StreamExited { success: true, .. })
        ));
    }

    #[tokio::test]
    async fn auto_start_is_one_shot() {
        let fx = Fixture::new();
        let ctrl = fx.controller(ToolRegistry::default());

        // The first attempt consumes the flag even though it fails.
        let first = ctrl.try_auto_start(StreamConfig::new(vec![], "", false));
        assert!(first.is_err());
        let second = ctrl
            .try_auto_start(StreamConfig::new(vec![PathBuf::from("a.mp4")], "XYZ", false))
            .unwrap();
        assert!(second.is_none());
        assert_eq!(ctrl.status().state, WorkerState::Idle);
    }
}
