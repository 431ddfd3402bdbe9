//! # Frame Error Trimmer
//!
//! Post-processes a delivered `StreamBatch` using the control columns embedded in
//! its most recent frame:
//!
//! - a non-empty last `@error` value fails the batch and drops its rows;
//! - otherwise the rows up to and including the latest `error` or `error-clear`
//!   opcode are dropped from the last frame, so the viewer only renders data
//!   received after the stream last failed or recovered.
//!
//! Batches that already carry a transport error, or have no frames, pass through.
//! Control columns whose lengths disagree with the rest of the frame are left alone.

use super::batch::{BatchError, StreamBatch};
use super::frame::{Frame, ERROR_FIELD_NAME, OPCODE_FIELD_NAME};

/// Opcode tagging a row that reports a stream failure.
pub const ERROR_OPCODE: &str = "error";
/// Opcode tagging a row that reports the stream recovered.
pub const ERROR_CLEAR_OPCODE: &str = "error-clear";

/// Applies error detection and marker trimming to one batch.
pub fn process(mut batch: StreamBatch) -> StreamBatch {
    if batch.error().is_some() {
        return batch;
    }

    let Some(last_frame) = batch.last_frame() else {
        return batch;
    };

    if let Some(message) = last_error_message(last_frame) {
        log::debug!("Stream reported error, dropping {} frame(s): {}", batch.frames.len(), message);
        batch.push_error(BatchError::new(message));
        batch.frames.clear();
        return batch;
    }

    if let Some(frame) = batch.last_frame_mut() {
        trim_to_last_marker(frame);
    }

    batch
}

/// The last `@error` value of the frame, when it is a non-empty message.
fn last_error_message(frame: &Frame) -> Option<String> {
    let field = frame.field(ERROR_FIELD_NAME)?;
    let message = field.values.last()?.as_str()?;
    if message.is_empty() {
        return None;
    }

    Some(message.to_string())
}

/// Index of the last row tagged `error` or `error-clear`.
fn last_marker_index(frame: &Frame) -> Option<usize> {
    let opcodes = &frame.field(OPCODE_FIELD_NAME)?.values;
    let last_error = opcodes.iter().rposition(|v| v.as_str() == Some(ERROR_OPCODE));
    let last_clear = opcodes.iter().rposition(|v| v.as_str() == Some(ERROR_CLEAR_OPCODE));

    last_error.max(last_clear)
}

fn trim_to_last_marker(frame: &mut Frame) {
    let Some(cut) = last_marker_index(frame) else {
        return;
    };

    if !frame.is_rectangular() {
        log::warn!("Frame '{}' has columns of unequal length, skipping trim", frame.name);
        return;
    }

    frame.drop_leading_rows(cut + 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::frame::FieldValue;

    fn opcodes(tags: &[&str]) -> Vec<FieldValue> {
        tags.iter().map(|t| FieldValue::from(*t)).collect()
    }

    fn ints(range: std::ops::Range<i64>) -> Vec<FieldValue> {
        range.map(FieldValue::Int).collect()
    }

    fn plain_frame(rows: i64) -> Frame {
        Frame::new("response").with_field("value", ints(0..rows))
    }

    #[test]
    fn empty_batch_is_returned_unchanged() {
        let batch = StreamBatch::default();
        assert_eq!(process(batch.clone()), batch);
    }

    #[test]
    fn transport_error_is_returned_unchanged() {
        let mut batch = StreamBatch::new(vec![Frame::new("error")
            .with_field(OPCODE_FIELD_NAME, opcodes(&["error"]))
            .with_field(ERROR_FIELD_NAME, vec!["data failure".into()])]);
        batch.push_error(BatchError::new("transport failure"));

        let out = process(batch.clone());
        assert_eq!(out, batch);
        assert_eq!(out.error().unwrap().message, "transport failure");
    }

    #[test]
    fn error_column_fails_the_batch() {
        let batch = StreamBatch::new(vec![
            plain_frame(3),
            Frame::new("error")
                .with_field(OPCODE_FIELD_NAME, opcodes(&["error"]))
                .with_field(ERROR_FIELD_NAME, vec!["Project 'p' is not running".into()]),
        ]);

        let out = process(batch);
        assert!(out.frames.is_empty());
        assert_eq!(out.error().unwrap().message, "Project 'p' is not running");
    }

    #[test]
    fn null_or_empty_last_error_is_ignored() {
        for last in [FieldValue::Null, FieldValue::from("")] {
            let frame = Frame::new("error")
                .with_field(OPCODE_FIELD_NAME, opcodes(&["insert", "insert"]))
                .with_field(ERROR_FIELD_NAME, vec!["old".into(), last.clone()]);
            let out = process(StreamBatch::new(vec![frame.clone()]));
            assert!(out.error().is_none());
            assert_eq!(out.frames, vec![frame]);
        }
    }

    #[test]
    fn trims_through_latest_error_clear() {
        let mut tags = vec!["insert"; 10];
        tags[3] = "error";
        tags[7] = "error-clear";
        let first = plain_frame(4);
        let last = Frame::new("response")
            .with_field(OPCODE_FIELD_NAME, opcodes(&tags))
            .with_field("value", ints(0..10));

        let out = process(StreamBatch::new(vec![first.clone(), last]));

        assert_eq!(out.frames[0], first);
        let trimmed = &out.frames[1];
        assert_eq!(trimmed.row_count(), 2);
        assert!(trimmed.is_rectangular());
        assert_eq!(trimmed.field("value").unwrap().values, ints(8..10));
    }

    #[test]
    fn trims_through_error_without_clear() {
        let mut tags = vec!["insert"; 8];
        tags[5] = "error";
        let frame = Frame::new("response")
            .with_field(OPCODE_FIELD_NAME, opcodes(&tags))
            .with_field("value", ints(0..8));

        let out = process(StreamBatch::new(vec![frame]));
        assert_eq!(out.frames[0].field("value").unwrap().values, ints(6..8));
    }

    #[test]
    fn frame_without_control_columns_passes_through() {
        let batch = StreamBatch::new(vec![plain_frame(5)]);
        assert_eq!(process(batch.clone()), batch);
    }

    #[test]
    fn processing_is_idempotent() {
        let frame = Frame::new("response")
            .with_field(OPCODE_FIELD_NAME, opcodes(&["insert", "error-clear", "insert", "update"]))
            .with_field("value", ints(0..4));

        let once = process(StreamBatch::new(vec![frame]));
        let twice = process(once.clone());
        assert_eq!(once, twice);
        assert_eq!(twice.frames[0].row_count(), 2);
    }

    #[test]
    fn ragged_frame_is_not_trimmed() {
        let frame = Frame::new("response")
            .with_field(OPCODE_FIELD_NAME, opcodes(&["error", "insert"]))
            .with_field("value", ints(0..1));

        let batch = StreamBatch::new(vec![frame]);
        assert_eq!(process(batch.clone()), batch);
    }
}
