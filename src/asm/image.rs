//! Program image files.
//!
//! A program image is the raw byte content of the program partition: byte
//! `i` of the file lands at address `i`. Images longer than the partition are
//! rejected here, before any memory is built.

use crate::cpu::memory::PROGRAM_SIZE;
use std::path::Path;
use thiserror::Error;

/// A validated program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    bytes: Vec<u8>,
}

impl ProgramImage {
    /// Wrap raw bytes, rejecting anything that does not fit the program partition.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.len() > PROGRAM_SIZE {
            return Err(ImageError::ProgramTooLarge {
                size: bytes.len(),
                max: PROGRAM_SIZE,
            });
        }
        Ok(Self { bytes })
    }

    /// The image content.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Load a program image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ProgramImage, ImageError> {
    let bytes = std::fs::read(path.as_ref())
        .map_err(|e| ImageError::IoError(e.to_string()))?;
    ProgramImage::from_bytes(bytes)
}

/// Save a program image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ProgramImage) -> Result<(), ImageError> {
    std::fs::write(path.as_ref(), image.bytes())
        .map_err(|e| ImageError::IoError(e.to_string()))
}

/// Errors that can occur while loading or saving images.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("program length {size} exceeds the {max}-byte program region")]
    ProgramTooLarge { size: usize, max: usize },
}
