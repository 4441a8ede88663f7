//! Image persistence abstraction.
//!
//! The scan core hands finished frames to an [`ImageSink`] together with
//! capture metadata; encoding, metadata embedding and directory layout are
//! the sink's business. A recording in-memory sink is provided for tests.

use crate::camera_interface::Frame;
use crate::position::Position;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// On-disk encodings a sink may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Bmp,
    Tiff,
}

/// Metadata attached to every saved capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMetadata {
    /// Camera device name.
    pub camera: String,
    /// Stage position at capture time.
    pub position: Position,
    /// Lens identifier, when one is configured.
    pub lens: Option<String>,
}

/// Errors produced by sink implementations.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("image write failed: {0}")]
    Write(String),
}

/// Capability contract for persisting captured frames.
pub trait ImageSink {
    /// Persist `frame` as `filename` (no extension) under `directory`.
    ///
    /// With `auto_number` set the sink appends a running index to avoid
    /// overwriting an existing file.
    fn save(
        &mut self,
        frame: &Frame,
        directory: &Path,
        filename: &str,
        auto_number: bool,
        format: ImageFormat,
        metadata: &CaptureMetadata,
    ) -> Result<(), SinkError>;
}

/// A saved entry recorded by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct SavedImage {
    pub filename: String,
    pub format: ImageFormat,
    pub metadata: CaptureMetadata,
    pub shape: (usize, usize),
}

/// In-memory sink that records every save call. Test double.
#[derive(Default)]
pub struct MemorySink {
    pub saved: Vec<SavedImage>,
    /// When set, every save fails with this message.
    pub fail_with: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageSink for MemorySink {
    fn save(
        &mut self,
        frame: &Frame,
        _directory: &Path,
        filename: &str,
        _auto_number: bool,
        format: ImageFormat,
        metadata: &CaptureMetadata,
    ) -> Result<(), SinkError> {
        if let Some(msg) = &self.fail_with {
            return Err(SinkError::Write(msg.clone()));
        }
        self.saved.push(SavedImage {
            filename: filename.to_string(),
            format,
            metadata: metadata.clone(),
            shape: frame.dim(),
        });
        Ok(())
    }
}
