//! # Live Buffer
//!
//! Accumulates the frames sent on one live channel so each delivery to a viewer
//! carries the recent history, the way a streaming data frame grows on the
//! viewer side. Frames with the same column layout as the buffered frame are
//! appended row-wise; a different layout replaces the buffered contents, so
//! rows received before an error or a recovery are never delivered again.

use super::batch::StreamBatch;
use super::frame::Frame;

/// Default number of rows kept in the buffered frame.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Row-bounded accumulator of streamed frames.
#[derive(Debug, Clone)]
pub struct LiveBuffer {
    frame: Option<Frame>,
    capacity: usize,
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LiveBuffer {
    /// Creates a buffer that keeps at most `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        Self {
            frame: None,
            capacity: capacity.max(1),
        }
    }

    /// Adds a received frame.
    pub fn push(&mut self, frame: Frame) {
        match self.frame.as_mut() {
            Some(current)
                if current.same_schema(&frame) && current.is_rectangular() && frame.is_rectangular() =>
            {
                for (column, incoming) in current.fields.iter_mut().zip(frame.fields) {
                    column.values.extend(incoming.values);
                }
            }
            _ => self.frame = Some(frame),
        }

        if let Some(current) = self.frame.as_mut() {
            let rows = current.row_count();
            if rows > self.capacity && current.is_rectangular() {
                current.drop_leading_rows(rows - self.capacity);
            }
        }
    }

    /// Current contents as a batch ready for post-processing.
    pub fn snapshot(&self) -> StreamBatch {
        StreamBatch::new(self.frame.iter().cloned().collect())
    }

    /// Rows held in the buffered frame.
    pub fn rows(&self) -> usize {
        self.frame.as_ref().map_or(0, Frame::row_count)
    }

    /// Whether nothing has been buffered yet.
    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
    }
}
