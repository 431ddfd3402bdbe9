//! # ESP Messages
//!
//! Inbound messages are classified into `EspMessage`; the outbound subscription
//! request is a serde-serialized `SubscriptionMessage`.

use serde::Serialize;

use super::wire::WireValue;

/// Info type reporting that the server discarded events for a slow subscriber.
const INFO_DISCARD_TYPE: &str = "event_source_discard";

/// Encoding requested for a subscription's event messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionFormat {
    /// Values arrive as strings nested under an `event` key.
    Json,
    /// Values arrive typed, in binary frames.
    #[default]
    Cbor,
}

/// One field announced by a schema message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    /// Field name.
    pub name: String,
    /// ESP type name, e.g. `int64`.
    pub type_name: String,
    /// Whether the field is part of the window key.
    pub key: bool,
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum EspMessage {
    /// Field types of a subscription's window.
    Schema {
        /// Subscription the schema belongs to.
        subscription_id: String,
        /// Window path (`project/cq/window`).
        window: String,
        /// Announced fields.
        fields: Vec<SchemaField>,
    },
    /// Event entries for a subscription.
    Events {
        /// Subscription the events belong to.
        subscription_id: String,
        /// Raw event entries.
        entries: Vec<WireValue>,
    },
    /// Server-side failure.
    Error(String),
    /// A project was loaded on the server.
    ProjectLoaded(String),
    /// A project was removed from the server.
    ProjectRemoved(String),
    /// Base64-encoded JSON messages delivered together.
    Bulk(Vec<String>),
    /// The server discarded events.
    InfoDiscard {
        /// Events discarded.
        discarded: u64,
        /// Events produced.
        total: u64,
    },
    /// Anything else.
    Unknown,
}

fn text_of(value: &WireValue, key: &str) -> String {
    value.get(key).and_then(WireValue::as_str).unwrap_or_default().to_string()
}

/// `{"name": ...}` bodies, also accepting a bare string.
fn name_of(value: &WireValue) -> String {
    match value {
        WireValue::Text(s) => s.clone(),
        other => text_of(other, "name"),
    }
}

impl EspMessage {
    /// Classifies a decoded message. Keys are checked in a fixed order:
    /// schema, events, error, project-loaded, project-removed, bulk, info.
    pub fn from_wire(message: &WireValue) -> EspMessage {
        let present = |key: &str| message.get(key).filter(|v| !matches!(v, WireValue::Null));

        if let Some(schema) = present("schema") {
            let fields = schema
                .get("fields")
                .and_then(WireValue::as_array)
                .unwrap_or_default()
                .iter()
                .map(|f| SchemaField {
                    name: text_of(f, "@name"),
                    type_name: text_of(f, "@type"),
                    key: text_of(f, "@key") == "true",
                })
                .collect();

            return EspMessage::Schema {
                subscription_id: text_of(schema, "@id"),
                window: text_of(schema, "@window"),
                fields,
            };
        }

        if let Some(events) = present("events") {
            return EspMessage::Events {
                subscription_id: text_of(events, "@id"),
                entries: events.get("entries").and_then(WireValue::as_array).unwrap_or_default().to_vec(),
            };
        }

        if let Some(error) = present("error") {
            let text = match error {
                WireValue::Text(s) => s.clone(),
                other => text_of(other, "text"),
            };
            return EspMessage::Error(text);
        }

        if let Some(loaded) = present("project-loaded") {
            return EspMessage::ProjectLoaded(name_of(loaded));
        }

        if let Some(removed) = present("project-removed") {
            return EspMessage::ProjectRemoved(name_of(removed));
        }

        if let Some(bulk) = present("bulk") {
            let encoded = bulk
                .as_array()
                .unwrap_or_default()
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            return EspMessage::Bulk(encoded);
        }

        if let Some(info) = present("info") {
            if info.get("type").and_then(WireValue::as_str) == Some(INFO_DISCARD_TYPE) {
                let data = info.get("data");
                let count = |key: &str| data.and_then(|d| d.get(key)).and_then(WireValue::as_u64).unwrap_or(0);
                return EspMessage::InfoDiscard {
                    discarded: count("discarded"),
                    total: count("total"),
                };
            }
        }

        EspMessage::Unknown
    }
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Body of an `event-stream` subscription request.
#[derive(Debug, Clone, Serialize)]
pub struct EventStreamMessage {
    /// Delivery interval in milliseconds; omitted when zero.
    #[serde(skip_serializing_if = "is_zero")]
    pub interval: u64,
    /// Maximum events per delivery; omitted when zero.
    #[serde(rename = "maxevents", skip_serializing_if = "is_zero")]
    pub max_events: u64,
    /// Always `set`.
    pub action: String,
    /// Subscription id.
    pub id: String,
    /// Window path (`project/cq/window`).
    pub window: String,
    /// Request a schema message before events.
    pub schema: bool,
    /// Include field values on delete events.
    #[serde(rename = "update-deletes")]
    pub update_deletes: bool,
    /// Event encoding.
    pub format: SubscriptionFormat,
    /// Fields to include; empty means all.
    pub include: Vec<String>,
}

/// Outbound subscription request.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionMessage {
    /// The request body.
    #[serde(rename = "event-stream")]
    pub event_stream: EventStreamMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esp::wire::decode_json;

    fn classify(json: &str) -> EspMessage {
        EspMessage::from_wire(&decode_json(json.as_bytes()).unwrap())
    }

    #[test]
    fn classifies_schema() {
        let msg = classify(
            r#"{"schema": {"@id": "p/cq/w/1", "@window": "p/cq/w",
                "fields": [{"@key": "true", "@name": "id", "@type": "int64"},
                           {"@key": "false", "@name": "price", "@type": "double"}]}}"#,
        );
        match msg {
            EspMessage::Schema { subscription_id, window, fields } => {
                assert_eq!(subscription_id, "p/cq/w/1");
                assert_eq!(window, "p/cq/w");
                assert_eq!(fields.len(), 2);
                assert!(fields[0].key);
                assert_eq!(fields[1].type_name, "double");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classifies_control_messages() {
        assert_eq!(classify(r#"{"error": {"text": "no such window"}}"#), EspMessage::Error("no such window".into()));
        assert_eq!(classify(r#"{"project-loaded": {"name": "p"}}"#), EspMessage::ProjectLoaded("p".into()));
        assert_eq!(classify(r#"{"project-removed": {"name": "p"}}"#), EspMessage::ProjectRemoved("p".into()));
        assert_eq!(classify(r#"{"bulk": ["e30="]}"#), EspMessage::Bulk(vec!["e30=".into()]));
        assert_eq!(
            classify(r#"{"info": {"type": "event_source_discard", "data": {"discarded": 2, "total": 9}}}"#),
            EspMessage::InfoDiscard { discarded: 2, total: 9 }
        );
        assert_eq!(classify(r#"{"info": {"type": "other"}}"#), EspMessage::Unknown);
        assert_eq!(classify(r#"{"surprise": 1}"#), EspMessage::Unknown);
    }

    #[test]
    fn subscription_message_shape() {
        let msg = SubscriptionMessage {
            event_stream: EventStreamMessage {
                interval: 0,
                max_events: 5,
                action: "set".into(),
                id: "p/cq/w/1".into(),
                window: "p/cq/w".into(),
                schema: true,
                update_deletes: true,
                format: SubscriptionFormat::Cbor,
                include: vec!["price".into()],
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"event-stream": {
                "maxevents": 5, "action": "set", "id": "p/cq/w/1", "window": "p/cq/w",
                "schema": true, "update-deletes": true, "format": "cbor", "include": ["price"]
            }})
        );
    }
}
