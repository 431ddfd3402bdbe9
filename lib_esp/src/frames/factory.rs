//! # Frame Factory
//!
//! Builds the single-row frames the backend sends on a live channel.

use super::frame::{FieldValue, Frame, FrameMeta, ERROR_FIELD_NAME, OPCODE_FIELD_NAME};
use super::trimmer::{ERROR_CLEAR_OPCODE, ERROR_OPCODE};

#[cfg(feature = "esp")]
use super::frame::TIMESTAMP_FIELD_NAME;
#[cfg(feature = "esp")]
use crate::esp::window_event::WindowEvent;

/// Name of frames carrying window events.
pub const RESPONSE_FRAME_NAME: &str = "response";

/// One row per window event: `@timestamp`, `@opcode`, then the event fields.
#[cfg(feature = "esp")]
pub fn window_event_frame(event: &WindowEvent) -> Frame {
    let mut frame = Frame::new(RESPONSE_FRAME_NAME)
        .with_field(TIMESTAMP_FIELD_NAME, vec![FieldValue::Time(event.time)])
        .with_field(OPCODE_FIELD_NAME, vec![FieldValue::from(event.opcode.as_str())]);

    for field in &event.fields {
        frame = frame.with_field(field.name.as_str(), vec![field.value.clone()]);
    }

    frame
}

/// A frame reporting a stream failure to the viewer.
pub fn error_frame(message: &str) -> Frame {
    Frame::new(ERROR_OPCODE)
        .with_field(OPCODE_FIELD_NAME, vec![FieldValue::from(ERROR_OPCODE)])
        .with_field(ERROR_FIELD_NAME, vec![FieldValue::from(message)])
}

/// A frame telling the viewer that earlier errors no longer apply.
pub fn error_clear_frame() -> Frame {
    Frame::new(ERROR_CLEAR_OPCODE).with_field(OPCODE_FIELD_NAME, vec![FieldValue::from(ERROR_CLEAR_OPCODE)])
}

/// The empty frame returned by a query, pointing the viewer at its live channel.
pub fn channel_frame(channel: String) -> Frame {
    Frame::new(RESPONSE_FRAME_NAME).with_meta(FrameMeta {
        channel: Some(channel),
    })
}
