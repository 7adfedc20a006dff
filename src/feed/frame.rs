use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// An image on display
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub received_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, content_type: &str) -> Self {
        Frame {
            bytes,
            content_type: content_type.to_string(),
            received_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The single display position for the current frame
///
/// Showing a new frame drops the slot's reference to the previous one, and
/// clearing drops it outright. Readers get a shared handle; once they let go
/// the old frame's memory is gone.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        FrameSlot::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Frame>>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put `frame` on display, releasing whatever was there
    pub fn show(&self, frame: Frame) {
        let previous = self.slot().replace(Arc::new(frame));
        drop(previous);
    }

    pub fn clear(&self) {
        self.slot().take();
    }

    pub fn current(&self) -> Option<Arc<Frame>> {
        self.slot().clone()
    }

    pub fn is_showing(&self) -> bool {
        self.slot().is_some()
    }
}
