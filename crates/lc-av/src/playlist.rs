//! Concat-demuxer playlists for multi-video streams.
//!
//! One `file '<absolute path>'` line per selected video, in selection order.
//! Single quotes inside a path are written as `'\''`, the concat demuxer's
//! quoting rule.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Render the manifest body for `media`.
///
/// Relative paths are made absolute against the current directory; the
/// files themselves need not exist.
pub fn render_playlist(media: &[PathBuf]) -> lc_core::Result<String> {
    let mut body = String::new();
    for path in media {
        let abs = std::path::absolute(path)?;
        let escaped = abs.to_string_lossy().replace('\'', r"'\''");
        body.push_str("file '");
        body.push_str(&escaped);
        body.push_str("'\n");
    }
    Ok(body)
}

/// A fully written manifest waiting next to its final location.
///
/// Dropping it without [`commit`](Self::commit) removes the staging file and
/// leaves any previous manifest untouched.
#[derive(Debug)]
pub struct StagedPlaylist {
    tmp: NamedTempFile,
    target: PathBuf,
    entries: usize,
}

impl StagedPlaylist {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the manifest into place, replacing any previous one atomically,
    /// and return its absolute location.
    pub fn commit(self) -> lc_core::Result<PathBuf> {
        self.tmp
            .persist(&self.target)
            .map_err(|e| lc_core::Error::Io { source: e.error })?;
        tracing::debug!(
            "Wrote playlist {} ({} entries)",
            self.target.display(),
            self.entries
        );
        Ok(self.target)
    }
}

/// Write the manifest for `media` into a staging file in the directory of
/// `path`. Nothing at `path` changes until the result is committed.
pub fn stage_playlist(path: &Path, media: &[PathBuf]) -> lc_core::Result<StagedPlaylist> {
    let body = render_playlist(media)?;
    let target = std::path::absolute(path)?;
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.flush()?;

    Ok(StagedPlaylist {
        tmp,
        target,
        entries: media.len(),
    })
}
