//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a config rooted in a scratch
//! directory and a full [`AppContext`]. The `with_server*` constructors start
//! Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use lc_av::ToolRegistry;
use lc_core::config::Config;
use lc_server::context::AppContext;
use lc_server::router::build_router;

/// Test harness wrapping a fully-constructed [`AppContext`] whose media
/// directory, playlist and scratch file live in a temporary directory.
pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Default configuration, no ffmpeg.
    pub fn new() -> Self {
        Self::build(|_| ToolRegistry::default())
    }

    /// Default configuration; `make_tools` receives the scratch directory.
    pub fn build(make_tools: impl FnOnce(&Path) -> ToolRegistry) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let media_dir = dir.path().join("media");
        std::fs::create_dir(&media_dir).expect("failed to create media dir");

        let mut config = Config::default();
        config.media.dir = media_dir;
        config.server.static_dir = None;
        config.stream.playlist_path = dir.path().join("playlist.txt");
        config.stream.cleanup_file = dir.path().join("temp_video.mp4");
        config.stream.stop_grace_secs = 1;

        let tools = make_tools(dir.path());
        let ctx = AppContext::new(config, tools);
        Self { ctx, dir }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::new().serve().await
    }

    /// Start a server whose "ffmpeg" is a shell script that echoes its
    /// arguments and then runs `tail`.
    #[cfg(unix)]
    pub async fn with_fake_ffmpeg(tail: &str) -> (Self, SocketAddr) {
        use std::os::unix::fs::PermissionsExt;

        let tail = tail.to_string();
        Self::build(move |scratch| {
            let path = scratch.join("fake-ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\necho \"fake encoder $*\"\n{tail}\n"))
                .expect("failed to write fake ffmpeg");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to chmod fake ffmpeg");
            ToolRegistry::default().with_tool("ffmpeg", path)
        })
        .serve()
        .await
    }

    async fn serve(self) -> (Self, SocketAddr) {
        let app = build_router(self.ctx.clone(), None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }

    /// Create a media file with the given name and contents.
    pub fn add_media(&self, name: &str) -> PathBuf {
        let path = self.ctx.config.media.dir.join(name);
        std::fs::write(&path, b"not really a video").expect("failed to write media");
        path
    }
}
