//! # servers
//!
//! HTTP and WebSocket bridge exposing one ESP datasource to viewers:
//! queries, health, resources and live channels carrying trimmed frame batches.

pub mod esp_logic;
