//! Basic image metadata for the viewer's file headers.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::{DiffError, DiffResult};

/// Size and, for images, pixel dimensions of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    /// File size in bytes
    pub num_bytes: u64,
    /// Width in pixels, if the file has a readable image header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Height in pixels, if the file has a readable image header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Read the metadata of the file at `path`.
///
/// A file that is not a decodable image is not an error; its dimensions are
/// simply absent.
///
/// # Errors
///
/// Returns [`DiffError::Io`] if the file cannot be stat'ed.
pub fn image_metadata(path: &Path) -> DiffResult<ImageMetadata> {
    let num_bytes = fs::metadata(path)
        .map_err(|e| DiffError::io(path, e))?
        .len();

    let (width, height) = match image::image_dimensions(path) {
        Ok((w, h)) => (Some(w), Some(h)),
        Err(e) => {
            log::trace!("No image dimensions for {}: {}", path.display(), e);
            (None, None)
        }
    };

    Ok(ImageMetadata {
        num_bytes,
        width,
        height,
    })
}
