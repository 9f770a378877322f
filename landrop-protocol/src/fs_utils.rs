//! File system helpers for received payloads
//!
//! Destination files are created inside the configured download
//! directory. Candidate names are claimed with `create_new`, so
//! concurrent receptions of the same file name get distinct paths and
//! an existing file is never truncated: if `file.txt` is taken the
//! reception falls through to `file (1).txt`, `file (2).txt`, ...
//! Partial output from a failed reception is left on disk for the
//! host to dispose of.

use crate::error::{ProtocolError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Ensure the destination directory exists, creating it if necessary.
pub async fn ensure_dir(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProtocolError::PermissionDenied(format!(
                "Cannot create directory {}: permission denied",
                dir.display()
            ))
        } else {
            ProtocolError::from_io_error(e, &format!("creating directory {}", dir.display()))
        }
    })
}

/// Create the destination file for `filename` inside `base_dir` under
/// a name that does not collide with an existing file.
///
/// Each candidate is opened with `create_new`, which makes claiming a
/// name atomic: two receptions arriving with the same file name at the
/// same time get distinct paths, and a completed file can never be
/// truncated by a later reception. Falls back to a timestamp suffix
/// after 1000 numbered conflicts.
pub async fn create_unique_file(
    base_dir: impl AsRef<Path>,
    filename: &str,
) -> Result<(fs::File, PathBuf)> {
    let base_dir = base_dir.as_ref();

    let (name, ext) = match filename.rfind('.') {
        // ext includes the dot
        Some(dot) if dot > 0 => filename.split_at(dot),
        _ => (filename, ""),
    };

    for i in 0..1000 {
        let candidate = if i == 0 {
            base_dir.join(filename)
        } else {
            base_dir.join(format!("{name} ({i}){ext}"))
        };

        if let Some(file) = try_create_new(&candidate).await? {
            debug!("Created file: {}", candidate.display());
            return Ok((file, candidate));
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let fallback = base_dir.join(format!("{name}_{timestamp}{ext}"));
    match try_create_new(&fallback).await? {
        Some(file) => Ok((file, fallback)),
        None => Err(ProtocolError::ResourceExhausted(format!(
            "No free destination name for {} in {}",
            filename,
            base_dir.display()
        ))),
    }
}

/// Open `path` with `create_new`; `Ok(None)` means the name is
/// already claimed and the caller should try the next candidate.
async fn try_create_new(path: &Path) -> Result<Option<fs::File>> {
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(match e.kind() {
            std::io::ErrorKind::PermissionDenied => ProtocolError::PermissionDenied(format!(
                "Cannot create file {}: permission denied",
                path.display()
            )),
            std::io::ErrorKind::StorageFull => {
                ProtocolError::ResourceExhausted(format!("Disk full: cannot create {}", path.display()))
            }
            _ => ProtocolError::from_io_error(e, &format!("creating file {}", path.display())),
        }),
    }
}

/// Append a chunk to the destination file with disk-full detection.
pub async fn write_file_safe(file: &mut fs::File, data: &[u8]) -> Result<()> {
    file.write_all(data).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::StorageFull => {
            ProtocolError::ResourceExhausted("Disk full during file write".to_string())
        }
        _ => ProtocolError::Io(e),
    })
}
