//! Image file I/O: loading and saving frames, output naming, frame listing.

use image::RgbImage;
use std::path::{Path, PathBuf};

/// Prefix given to files written next to their target.
pub const SWAPPED_PREFIX: &str = "swapped-";

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to list frames in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Load an image from disk as 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, FrameError> {
    let image = image::open(path).map_err(|source| FrameError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Save an RGB image; the format follows the file extension.
pub fn save_rgb(image: &RgbImage, path: &Path) -> Result<(), FrameError> {
    image.save(path).map_err(|source| FrameError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// `dir/name` → `dir/swapped-name`; a bare `name` → `swapped-name`.
pub fn swapped_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{SWAPPED_PREFIX}{name}"))
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// True for file extensions the frame pipeline can read and write.
pub fn is_image(path: &Path) -> bool {
    has_extension(path, &FRAME_EXTENSIONS)
}

/// Sort key: numeric stems (`9999`, `10000`) in numeric order, then by name.
fn frame_order(path: &Path) -> (Option<u64>, Option<std::ffi::OsString>) {
    let number = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse().ok());
    (number, path.file_name().map(|name| name.to_os_string()))
}

/// Image files directly inside `dir`, in frame order.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, FrameError> {
    let list_err = |source| FrameError::List {
        path: dir.to_path_buf(),
        source,
    };

    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(list_err)? {
        let path = entry.map_err(list_err)?.path();
        if path.is_file() && is_image(&path) {
            frames.push(path);
        }
    }
    frames.sort_by_cached_key(|path| frame_order(path));

    tracing::debug!(dir = %dir.display(), count = frames.len(), "listed frames");
    Ok(frames)
}
