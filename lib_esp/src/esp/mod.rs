//! # ESP
//!
//! Client side of the SAS Event Stream Processing WebSocket API: wire decoding,
//! message classification, window event parsing and the connection itself.

pub mod client;
pub mod messages;
pub mod schema;
pub mod window_event;
pub mod wire;

pub use client::{ClientEvent, EspClientError, EspConnection, EspWsClient, MessageDecoder, SubscriptionRequest};
pub use messages::SubscriptionFormat;
pub use schema::SchemaType;
pub use window_event::{EventField, WindowEvent};
