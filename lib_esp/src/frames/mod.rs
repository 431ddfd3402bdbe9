//! # Frames Module
//!
//! The columnar data model exchanged between the ESP stream and the viewer.
//!
//! ## Contained Modules:
//! - **`frame`**: `Frame`, `Field` and `FieldValue`, plus the reserved column names.
//! - **`batch`**: `StreamBatch`, one delivery cycle with its errors.
//! - **`trimmer`**: the error trimmer applied to each delivered batch.
//! - **`factory`**: constructors for event, error, error-clear and channel frames.
//! - **`live`**: the per-channel accumulator that produces batches for delivery.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Columnar frame model.
pub mod frame;
/// Stream batches and batch errors.
pub mod batch;
/// Error detection and marker trimming for delivered batches.
pub mod trimmer;
/// Frame constructors.
pub mod factory;
/// Per-channel frame accumulator.
pub mod live;

// --- Public API Re-exports ---
pub use batch::{BatchError, StreamBatch};
pub use frame::{Field, FieldValue, Frame, FrameMeta};
pub use live::LiveBuffer;
pub use trimmer::process;
