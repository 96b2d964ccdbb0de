//! Selectable media: listing, reference resolution and upload targets.
//!
//! Every file the encoder may read lives inside `media.dir`. References from
//! clients are plain names (or relative paths) under that directory; anything
//! that escapes it is rejected.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use lc_core::config::MediaConfig;

/// One selectable media file.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct MediaEntry {
    /// File name relative to the media directory.
    pub name: String,
    pub size_bytes: u64,
}

/// List files in the media directory with an allowed extension, sorted by
/// name. A missing directory lists as empty.
pub fn list_media(cfg: &MediaConfig) -> lc_core::Result<Vec<MediaEntry>> {
    let entries = match std::fs::read_dir(&cfg.dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("Media directory {} does not exist", cfg.dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut media = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !cfg.is_allowed(&path) {
            continue;
        }
        let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
        media.push(MediaEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size_bytes,
        });
    }
    media.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(media)
}

/// Resolve a client reference to an existing media file.
///
/// Relative references are joined onto the media directory and may not
/// contain `..`. Absolute references are accepted only when they point
/// inside the media directory.
pub fn resolve_media(cfg: &MediaConfig, reference: &Path) -> lc_core::Result<PathBuf> {
    let display = reference.display().to_string();
    let root = std::path::absolute(&cfg.dir)?;

    let candidate = if reference.is_absolute() {
        if !reference.starts_with(&root) {
            return Err(lc_core::Error::validation(format!(
                "media '{display}' is outside the media directory"
            )));
        }
        reference.to_path_buf()
    } else {
        root.join(reference)
    };

    let escapes = candidate
        .strip_prefix(&root)
        .map(|rest| rest.components().any(|c| !matches!(c, Component::Normal(_))))
        .unwrap_or(true);
    if escapes {
        return Err(lc_core::Error::validation(format!(
            "media '{display}' is outside the media directory"
        )));
    }

    if !cfg.is_allowed(&candidate) {
        return Err(lc_core::Error::validation(format!(
            "media '{display}' does not have an allowed extension ({})",
            cfg.extensions.join(", ")
        )));
    }
    if !candidate.is_file() {
        return Err(lc_core::Error::validation(format!(
            "media '{display}' does not exist"
        )));
    }
    Ok(candidate)
}

/// Where an uploaded file called `file_name` is saved.
///
/// Only the base name is kept, so clients cannot place files outside the
/// media directory.
pub fn upload_target(cfg: &MediaConfig, file_name: &str) -> lc_core::Result<PathBuf> {
    let base = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if base.is_empty() || base.starts_with('.') {
        return Err(lc_core::Error::validation(format!(
            "invalid upload file name '{file_name}'"
        )));
    }
    let target = cfg.dir.join(&base);
    if !cfg.is_allowed(&target) {
        return Err(lc_core::Error::validation(format!(
            "'{base}' does not have an allowed extension ({})",
            cfg.extensions.join(", ")
        )));
    }
    Ok(target)
}
