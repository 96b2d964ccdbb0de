//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, external tools, media directory and the
//! streaming profile. Every section defaults sensibly so a completely empty
//! `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// Placeholder replaced by the destination key in
/// [`StreamSettings::endpoint_template`].
pub const KEY_PLACEHOLDER: &str = "{key}";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub media: MediaConfig,
    pub stream: StreamSettings,
    /// Stream started once, without user interaction, when the server boots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autostart: Option<AutoStartConfig>,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if !self.media.dir.is_dir() {
            warnings.push(format!(
                "media.dir '{}' is not a directory; it will be created on first upload",
                self.media.dir.display()
            ));
        }

        if self.media.extensions.is_empty() {
            warnings.push("media.extensions is empty; no file can be selected".into());
        }

        let template = &self.stream.endpoint_template;
        if !template.contains("://") {
            warnings.push(format!(
                "stream.endpoint_template '{template}' has no URL scheme"
            ));
        }
        if !template.contains(KEY_PLACEHOLDER) {
            warnings.push(format!(
                "stream.endpoint_template has no {KEY_PLACEHOLDER} placeholder; the key will be appended"
            ));
        }

        if self.stream.log_capacity == 0 {
            warnings.push("stream.log_capacity is 0; no log lines will be retained".into());
        }

        if let Some(ref auto) = self.autostart {
            if auto.media.is_empty() {
                warnings.push("autostart.media is empty; auto-start will be rejected".into());
            }
            if auto.key.is_empty() {
                warnings.push("autostart.key is empty; auto-start will be rejected".into());
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8501,
            static_dir: Some(PathBuf::from("./static")),
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}

/// Where selectable media lives and which files qualify.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub dir: PathBuf,
    /// Lowercase extensions without the leading dot.
    pub extensions: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            extensions: vec!["mp4".into(), "flv".into()],
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl MediaConfig {
    /// Whether `path` carries one of the allowed extensions (case-insensitive).
    pub fn is_allowed(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }
}

/// Streaming session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Ingest URL; `{key}` is replaced verbatim by the destination key.
    pub endpoint_template: String,
    /// Concat manifest written before every multi-video start.
    pub playlist_path: PathBuf,
    /// Scratch file removed on every stop.
    pub cleanup_file: PathBuf,
    /// Number of recent log lines retained for the panel.
    pub log_capacity: usize,
    /// Reject keys outside `[A-Za-z0-9_-]{1,128}` before building the URL.
    pub validate_key: bool,
    /// Time ffmpeg gets to quit after `q` before it is killed.
    pub stop_grace_secs: u64,
    pub profile: EncoderProfile,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            endpoint_template: "rtmp://a.rtmp.youtube.com/live2/{key}".into(),
            playlist_path: PathBuf::from("playlist.txt"),
            cleanup_file: PathBuf::from("temp_video.mp4"),
            log_capacity: 20,
            validate_key: true,
            stop_grace_secs: 2,
            profile: EncoderProfile::default(),
        }
    }
}

/// Fixed encode-and-publish template handed to ffmpeg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderProfile {
    pub video_codec: String,
    pub preset: String,
    pub video_bitrate: String,
    pub maxrate: String,
    pub bufsize: String,
    /// Keyframe interval in frames, used for both `-g` and `-keyint_min`.
    pub gop: u32,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub shorts_width: u32,
    pub shorts_height: u32,
    pub output_format: String,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            preset: "veryfast".into(),
            video_bitrate: "2500k".into(),
            maxrate: "2500k".into(),
            bufsize: "5000k".into(),
            gop: 60,
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
            shorts_width: 720,
            shorts_height: 1280,
            output_format: "flv".into(),
        }
    }
}

/// Parameters for the one-shot automatic start.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoStartConfig {
    pub media: Vec<PathBuf>,
    pub key: String,
    pub shorts: bool,
}

impl fmt::Debug for AutoStartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoStartConfig")
            .field("media", &self.media)
            .field("key", &"<redacted>")
            .field("shorts", &self.shorts)
            .finish()
    }
}
