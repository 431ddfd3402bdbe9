//! # Channel Queries
//!
//! A query names one ESP window plus its delivery options. Its identity,
//! excluding credentials, is hashed into the live channel path so that equal
//! queries share one stream.

use sha2::{Digest, Sha256};

use super::server::EspServer;
use crate::esp::{SubscriptionFormat, SubscriptionRequest};

/// Prefix of every channel path.
pub const CHANNEL_PATH_PREFIX: &str = "stream/";

/// A window subscription bound to a server.
#[derive(Clone, PartialEq, Eq)]
pub struct Query {
    /// ESP server to connect to.
    pub server: EspServer,
    /// Project name.
    pub project: String,
    /// Continuous query name.
    pub cq: String,
    /// Window name.
    pub window: String,
    /// Fields to include; empty means all.
    pub fields: Vec<String>,
    /// Delivery interval in milliseconds.
    pub interval: u64,
    /// Maximum events per delivery.
    pub max_events: u64,
    /// `Authorization` value forwarded to the server.
    pub authorization: Option<String>,
}

// Hand-written so credentials never reach the logs.
impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("server", &self.server.url().as_str())
            .field("project", &self.project)
            .field("cq", &self.cq)
            .field("window", &self.window)
            .field("fields", &self.fields)
            .field("interval", &self.interval)
            .field("max_events", &self.max_events)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Query {
    /// `stream/<hex sha256>` over the server URL, window path, interval,
    /// max events and fields. The authorization does not take part.
    pub fn channel_path(&self) -> String {
        let interval = self.interval.to_string();
        let max_events = self.max_events.to_string();
        let fields = self.fields.join("/");

        let parts: [&[u8]; 7] = [
            self.server.url().as_str().as_bytes(),
            self.project.as_bytes(),
            self.cq.as_bytes(),
            self.window.as_bytes(),
            interval.as_bytes(),
            max_events.as_bytes(),
            fields.as_bytes(),
        ];

        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update([0u8]);
            }
            hasher.update(part);
        }

        format!("{}{}", CHANNEL_PATH_PREFIX, hex::encode(hasher.finalize()))
    }

    /// The subscription to send once connected.
    pub fn subscription(&self) -> SubscriptionRequest {
        SubscriptionRequest {
            project: self.project.clone(),
            cq: self.cq.clone(),
            window: self.window.clone(),
            interval: self.interval,
            max_events: self.max_events,
            fields: self.fields.clone(),
            format: SubscriptionFormat::Cbor,
        }
    }
}
