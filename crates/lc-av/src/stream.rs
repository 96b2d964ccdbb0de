//! The loop-and-publish ffmpeg invocation.
//!
//! Everything here is pure argument construction; spawning and supervision
//! live in the server's worker. The argument order is fixed:
//!
//! ```text
//! [-f concat -safe 0] -re -stream_loop -1 -i <input>
//! -c:v <codec> -preset <preset> -b:v <rate> -maxrate <rate> -bufsize <size>
//! -g <gop> -keyint_min <gop> -c:a <codec> -b:a <rate>
//! [-vf scale=<w>:<h>] -f <format> <destination>
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use lc_core::config::{EncoderProfile, StreamSettings, KEY_PLACEHOLDER};

use crate::command::ToolCommand;

/// Longest destination key accepted by [`StreamKey::check_policy`].
pub const MAX_KEY_LEN: usize = 128;

// ---------------------------------------------------------------------------
// StreamKey
// ---------------------------------------------------------------------------

/// Destination key: an opaque credential that never appears in logs.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw key, for URL construction only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked form for status output: the last four characters survive when
    /// the key is long enough for that to be harmless.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 8 {
            return "****".into();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{tail}")
    }

    /// Enforce the credential policy: 1 to [`MAX_KEY_LEN`] characters from
    /// `[A-Za-z0-9_-]`.
    pub fn check_policy(&self) -> lc_core::Result<()> {
        if self.0.is_empty() {
            return Err(lc_core::Error::validation("stream key is required"));
        }
        if self.0.len() > MAX_KEY_LEN {
            return Err(lc_core::Error::validation(format!(
                "stream key is longer than {MAX_KEY_LEN} characters"
            )));
        }
        if !self
            .0
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(lc_core::Error::validation(
                "stream key may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamKey(<redacted>)")
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

// ---------------------------------------------------------------------------
// StreamConfig
// ---------------------------------------------------------------------------

/// What the user asked to stream.
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Selected media, in playback order.
    pub media: Vec<PathBuf>,
    pub key: StreamKey,
    /// Force portrait output for vertical short-form video.
    pub shorts: bool,
}

impl StreamConfig {
    pub fn new(media: Vec<PathBuf>, key: impl Into<String>, shorts: bool) -> Self {
        Self {
            media,
            key: StreamKey::new(key),
            shorts,
        }
    }

    /// Presence checks required before any worker may start.
    pub fn validate(&self) -> lc_core::Result<()> {
        match (self.media.is_empty(), self.key.is_empty()) {
            (true, true) => Err(lc_core::Error::validation(
                "at least one video and a stream key are required",
            )),
            (true, false) => Err(lc_core::Error::validation("at least one video is required")),
            (false, true) => Err(lc_core::Error::validation("stream key is required")),
            (false, false) => Ok(()),
        }
    }

    /// More than one file means ffmpeg reads a concat playlist.
    pub fn needs_playlist(&self) -> bool {
        self.media.len() > 1
    }
}

// ---------------------------------------------------------------------------
// Argument construction
// ---------------------------------------------------------------------------

/// Source handed to ffmpeg's `-i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInput {
    /// A single media file, read directly.
    File(PathBuf),
    /// A concat manifest listing several files.
    Playlist(PathBuf),
}

impl StreamInput {
    pub fn path(&self) -> &Path {
        match self {
            StreamInput::File(p) | StreamInput::Playlist(p) => p,
        }
    }
}

/// Substitute `key` into `template` verbatim.
///
/// No escaping or validation happens here; callers that accept keys from
/// users run [`StreamKey::check_policy`] first. A template without the
/// `{key}` placeholder gets the key appended as the last path segment.
pub fn destination_url(template: &str, key: &str) -> String {
    if template.contains(KEY_PLACEHOLDER) {
        template.replace(KEY_PLACEHOLDER, key)
    } else {
        format!("{}/{}", template.trim_end_matches('/'), key)
    }
}

/// Build the ffmpeg argument list (program name excluded).
pub fn build_args(
    profile: &EncoderProfile,
    input: &StreamInput,
    shorts: bool,
    destination: &str,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(40);

    // Input stage. Looping and real-time pacing apply in both modes.
    if let StreamInput::Playlist(_) = input {
        args.extend(["-f", "concat", "-safe", "0"].map(String::from));
    }
    args.extend(["-re", "-stream_loop", "-1", "-i"].map(String::from));
    args.push(input.path().to_string_lossy().into_owned());

    // Video.
    let gop = profile.gop.to_string();
    args.extend([
        "-c:v".to_string(),
        profile.video_codec.clone(),
        "-preset".to_string(),
        profile.preset.clone(),
        "-b:v".to_string(),
        profile.video_bitrate.clone(),
        "-maxrate".to_string(),
        profile.maxrate.clone(),
        "-bufsize".to_string(),
        profile.bufsize.clone(),
        "-g".to_string(),
        gop.clone(),
        "-keyint_min".to_string(),
        gop,
    ]);

    // Audio.
    args.extend([
        "-c:a".to_string(),
        profile.audio_codec.clone(),
        "-b:a".to_string(),
        profile.audio_bitrate.clone(),
    ]);

    if shorts {
        args.push("-vf".into());
        args.push(format!(
            "scale={}:{}",
            profile.shorts_width, profile.shorts_height
        ));
    }

    args.push("-f".into());
    args.push(profile.output_format.clone());
    args.push(destination.to_string());
    args
}

/// Build the complete publish command for `ffmpeg`.
pub fn build_command(
    ffmpeg: &Path,
    settings: &StreamSettings,
    input: &StreamInput,
    shorts: bool,
    key: &StreamKey,
) -> ToolCommand {
    let url = destination_url(&settings.endpoint_template, key.expose());
    let mut cmd = ToolCommand::new(ffmpeg.to_path_buf());
    cmd.args(build_args(&settings.profile, input, shorts, &url));
    cmd
}
