//! # Stream Batches
//!
//! One delivery cycle of a streamed response: the frames received so far plus
//! any error attached to the response.

use serde::{Deserialize, Serialize};

use super::frame::Frame;

/// An error attached to a batch, either by the transport or lifted from the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    /// Human readable message.
    pub message: String,
}

impl BatchError {
    /// Creates an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// # Stream Batch
///
/// The payload handed from the transport to the viewer for one delivery cycle.
/// The last entry of `errors` is the batch's current error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamBatch {
    /// Frames in delivery order.
    pub frames: Vec<Frame>,
    /// Errors attached to the batch, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BatchError>,
}

impl StreamBatch {
    /// Creates a batch without errors.
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            errors: Vec::new(),
        }
    }

    /// Creates a batch that already failed in the transport.
    pub fn failed(error: BatchError) -> Self {
        Self {
            frames: Vec::new(),
            errors: vec![error],
        }
    }

    /// The batch's current error, if any.
    pub fn error(&self) -> Option<&BatchError> {
        self.errors.last()
    }

    /// Attaches an error, making it the batch's current error.
    pub fn push_error(&mut self, error: BatchError) {
        self.errors.push(error);
    }

    /// The last frame of the batch.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Mutable access to the last frame of the batch.
    pub fn last_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }
}
