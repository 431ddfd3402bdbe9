//! # lib_esp
//!
//! Backend of a streaming data source for SAS Event Stream Processing (ESP).
//!
//! Modules are enabled by cargo features:
//!
//! - **`frames`**: columnar frames, the live buffer and the error trimmer.
//! - **`esp`**: ESP wire decoding and the WebSocket client.
//! - **`retrieve`**: HTTP client with retries.
//! - **`plugin`**: datasource handlers built on the above.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "frames")]
pub mod frames;

#[cfg(feature = "esp")]
pub mod esp;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "plugin")]
pub mod plugin;
