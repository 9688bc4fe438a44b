//! Still images on disk.
//!
//! Decoding goes through `image::load_from_memory`, so any enabled format
//! (PNG, JPEG, BMP, WebP, GIF) is recognised by content rather than by
//! extension. Saving picks the encoder from the output path's extension.

use std::path::{Path, PathBuf};

use retroframe_pipeline::RgbImage;

/// Errors that can occur while loading a still image.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but holds no bytes.
    #[error("{} is empty", path.display())]
    Empty {
        /// File that was being read.
        path: PathBuf,
    },

    /// The bytes are not a recognised or intact image.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        /// File that was being decoded.
        path: PathBuf,
        /// Underlying codec error.
        #[source]
        source: image::ImageError,
    },
}

/// Errors that can occur while saving a still image.
#[derive(Debug, thiserror::Error)]
#[error("failed to write {}: {source}", path.display())]
pub struct SaveError {
    /// Destination file.
    pub path: PathBuf,
    /// Underlying codec or I/O error.
    #[source]
    pub source: image::ImageError,
}

/// Read and decode an image file into 8-bit RGB. Alpha is dropped.
///
/// # Errors
///
/// Returns [`LoadError::Io`] if the file cannot be read,
/// [`LoadError::Empty`] if it has no content, and [`LoadError::Decode`]
/// if the format is unrecognised or the data is corrupt.
pub fn load_image(path: impl AsRef<Path>) -> Result<RgbImage, LoadError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    let decoded = image::load_from_memory(&bytes).map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(
        path = %path.display(),
        width = decoded.width(),
        height = decoded.height(),
        "image loaded"
    );
    Ok(decoded.to_rgb8())
}

/// Encode `image` to `path`, choosing the format from the extension.
///
/// # Errors
///
/// Returns [`SaveError`] if the extension is not a supported format or
/// the file cannot be written.
pub fn save_image(image: &RgbImage, path: impl AsRef<Path>) -> Result<(), SaveError> {
    let path = path.as_ref();
    image.save(path).map_err(|source| SaveError {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "image saved");
    Ok(())
}
