//! Filesystem helpers for publishing rendered files.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// EXDEV on Linux/macOS.
const CROSS_DEVICE_ERRNO: i32 = 18;

/// Hidden sibling path used while a file is being written.
///
/// The extension is preserved so FFmpeg still picks the right muxer.
pub fn partial_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!(".{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.partial", stem),
    };
    path.with_file_name(name)
}

/// Move `src` to `dst`, creating the destination directory.
///
/// Tries a rename first; across filesystems the file is copied next to the
/// destination and renamed into place so `dst` never holds a partial file.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERRNO) => {
            tracing::debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            let staged = partial_path(dst);
            if let Err(e) = fs::copy(src, &staged).await {
                remove_quietly(&staged).await;
                return Err(MediaError::from(e));
            }
            if let Err(e) = fs::rename(&staged, dst).await {
                remove_quietly(&staged).await;
                return Err(MediaError::from(e));
            }
            remove_quietly(src).await;
            Ok(())
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Remove a file, ignoring a missing file and logging other failures.
pub async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
