//! Uploaded photos: validation, decoding and scoped files on disk.
//!
//! An upload is written to a temporary file that is removed when its guard is
//! dropped, whichever way the request ends. A successful registration moves
//! it into the faces directory; that copy is removed again unless the caller
//! commits it after the database write.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Upload size limit (5 MiB).
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("{0}")]
    InvalidUpload(String),
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("photo file: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw upload as received by the web layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Lowercased extension, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Reject empty, oversized or non-image uploads before touching the disk.
    pub fn validate(&self, max_bytes: usize) -> Result<(), PhotoError> {
        if self.filename.trim().is_empty() || self.bytes.is_empty() {
            return Err(PhotoError::InvalidUpload("photo must not be empty".into()));
        }
        match self.extension() {
            Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => {
                return Err(PhotoError::InvalidUpload(
                    "unsupported file type; use JPG, JPEG or PNG".into(),
                ))
            }
        }
        if self.bytes.len() > max_bytes {
            return Err(PhotoError::InvalidUpload(format!(
                "photo is {} bytes; the limit is {max_bytes}",
                self.bytes.len()
            )));
        }
        Ok(())
    }
}

/// Decoded RGB pixels handed to the face encoder.
#[derive(Debug, Clone)]
pub struct Photo {
    pixels: RgbImage,
}

impl Photo {
    /// Decode uploaded bytes, detecting the format from their contents.
    pub fn decode(bytes: &[u8]) -> Result<Self, PhotoError> {
        let pixels = image::load_from_memory(bytes)?.to_rgb8();
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(PhotoError::InvalidUpload("image has no pixels".into()));
        }
        Ok(Self { pixels })
    }

    pub fn from_rgb(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "photo file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove photo file"),
    }
}

/// Upload written to the upload directory, deleted on drop.
#[derive(Debug)]
pub struct TempPhoto {
    path: PathBuf,
    extension: String,
}

impl TempPhoto {
    /// Write `upload` under `dir` as `{tag}_{random}.{ext}`.
    pub fn create(dir: &Path, tag: &str, upload: &Upload) -> Result<Self, PhotoError> {
        let extension = upload.extension().unwrap_or_else(|| "jpg".to_string());
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{tag}_{}.{extension}", Uuid::new_v4().simple()));
        std::fs::write(&path, &upload.bytes)?;
        tracing::debug!(path = %path.display(), bytes = upload.bytes.len(), "upload stored");
        Ok(Self { path, extension })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file into `faces_dir` under a fresh random name.
    pub fn persist_into(self, faces_dir: &Path) -> Result<StoredPhoto, PhotoError> {
        std::fs::create_dir_all(faces_dir)?;
        let dest = faces_dir.join(format!("{}.{}", Uuid::new_v4().simple(), self.extension));
        if std::fs::rename(&self.path, &dest).is_err() {
            // Upload and faces directories may live on different filesystems.
            std::fs::copy(&self.path, &dest)?;
        }
        // `self` drops here and removes the source if the copy path was taken.
        Ok(StoredPhoto {
            path: dest,
            committed: false,
        })
    }
}

impl Drop for TempPhoto {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}

/// Photo moved into the faces directory; deleted on drop unless committed.
#[derive(Debug)]
pub struct StoredPhoto {
    path: PathBuf,
    committed: bool,
}

impl StoredPhoto {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file; called once the owning record is persisted.
    pub fn commit(mut self) -> PathBuf {
        self.committed = true;
        self.path.clone()
    }
}

impl Drop for StoredPhoto {
    fn drop(&mut self) {
        if !self.committed {
            remove_quietly(&self.path);
        }
    }
}
