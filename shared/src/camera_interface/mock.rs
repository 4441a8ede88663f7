//! Mock camera implementation for testing.

use super::{CameraInterface, Frame};
use std::sync::{Arc, Mutex};

/// Mock camera fed from a list of canned frames.
///
/// In sequence mode each `snap` consumes the next entry (a `None` entry
/// simulates a dropped frame; the list exhausting also yields `None`). In
/// repeating mode the single frame is returned forever. A frame source
/// closure can be attached instead, for cameras whose image depends on
/// external state such as a mock stage's Z position.
pub struct MockCamera {
    frames: Vec<Option<Frame>>,
    index: usize,
    repeating: bool,
    source: Option<Box<dyn FnMut() -> Option<Frame> + Send>>,
    name: String,
    pub snap_calls: Arc<Mutex<usize>>,
}

impl MockCamera {
    /// Camera that plays back `frames` once, then returns `None`.
    pub fn new(frames: Vec<Option<Frame>>) -> Self {
        Self {
            frames,
            index: 0,
            repeating: false,
            source: None,
            name: "mock-camera".to_string(),
            snap_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Camera that returns the same frame forever.
    pub fn repeating(frame: Frame) -> Self {
        let mut cam = Self::new(vec![Some(frame)]);
        cam.repeating = true;
        cam
    }

    /// Camera that asks `source` for every frame.
    pub fn from_source(source: impl FnMut() -> Option<Frame> + Send + 'static) -> Self {
        let mut cam = Self::new(Vec::new());
        cam.source = Some(Box::new(source));
        cam
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl CameraInterface for MockCamera {
    fn snap(&mut self) -> Option<Frame> {
        *self
            .snap_calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
        if let Some(source) = self.source.as_mut() {
            return source();
        }
        if self.repeating {
            return self.frames.first().cloned().flatten();
        }
        let frame = self.frames.get(self.index).cloned().flatten();
        if self.index < self.frames.len() {
            self.index += 1;
        }
        frame
    }

    fn name(&self) -> &str {
        &self.name
    }
}
