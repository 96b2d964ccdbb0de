//! # lc-av
//!
//! External encoder management for loopcast.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the path to
//!   ffmpeg.
//! - **Command building** ([`ToolCommand`]) -- argument builder that spawns a
//!   supervised child with piped stdio and renders a key-masked command line.
//! - **Publish template** ([`stream`]) -- the fixed loop-and-publish argument
//!   list for a [`StreamConfig`].
//! - **Concat playlists** ([`playlist`]) -- the manifest ffmpeg reads in
//!   multi-video mode.

pub mod command;
pub mod playlist;
pub mod stream;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::ToolCommand;
pub use playlist::{render_playlist, stage_playlist, StagedPlaylist};
pub use stream::{build_args, build_command, destination_url, StreamConfig, StreamInput, StreamKey};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
