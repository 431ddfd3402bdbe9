//! # ESP WebSocket Client
//!
//! Connects to an ESP server's `eventStreamProcessing/v2/connect` endpoint,
//! performs the text handshake, sends window subscriptions and turns the
//! server's JSON/CBOR messages into `ClientEvent`s.
//!
//! Decoding is kept apart from the socket in `MessageDecoder` so the message
//! handling can be driven without a network connection.

use std::collections::{HashMap, VecDeque};

use base64::{engine::general_purpose, Engine as _};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION},
        protocol::Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;
use uuid::Uuid;

use super::messages::{EspMessage, EventStreamMessage, SubscriptionFormat, SubscriptionMessage};
use super::schema::SchemaType;
use super::window_event::{parse_window_event, WindowEvent};
use super::wire::{decode_binary, decode_json, WireValue};

/// Prefix of the server's handshake acknowledgement.
const HANDSHAKE_PREFIX: &[u8] = b"status: 200\n";

/// Key wrapping each event entry of a JSON subscription.
const JSON_EVENT_KEY: &str = "event";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fatal client failures. Any of these ends the stream.
#[derive(Debug, Error)]
pub enum EspClientError {
    /// Socket-level failure while connecting or reading.
    #[error("websocket connection error")]
    Connection(#[source] Box<tungstenite::Error>),

    /// The server closed the socket.
    #[error("websocket connection error")]
    ConnectionClosed,

    /// The server sent an `error` message.
    #[error("{0}")]
    Server(String),

    /// A schema message announced a field type this client does not know.
    #[error("unknown schema field type: {0}")]
    UnknownFieldType(String),

    /// The authorization value cannot be sent as a header.
    #[error("invalid authorization header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// The subscription request could not be serialized.
    #[error("cannot encode subscription message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<tungstenite::Error> for EspClientError {
    fn from(err: tungstenite::Error) -> Self {
        EspClientError::Connection(Box::new(err))
    }
}

/// What the client reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The handshake completed; subscriptions may now be sent.
    Connected,
    /// A window emitted an event.
    Window(WindowEvent),
    /// A project was loaded on the server.
    ProjectLoaded(String),
    /// A project was removed from the server.
    ProjectRemoved(String),
}

/// The window and delivery options of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Project name.
    pub project: String,
    /// Continuous query name.
    pub cq: String,
    /// Window name.
    pub window: String,
    /// Delivery interval in milliseconds; zero lets the server decide.
    pub interval: u64,
    /// Maximum events per delivery; zero lets the server decide.
    pub max_events: u64,
    /// Fields to include; empty means all.
    pub fields: Vec<String>,
    /// Event encoding.
    pub format: SubscriptionFormat,
}

impl SubscriptionRequest {
    /// `project/cq/window`
    pub fn window_path(&self) -> String {
        format!("{}/{}/{}", self.project, self.cq, self.window)
    }
}

#[derive(Debug)]
struct Subscription {
    schema: Option<HashMap<String, SchemaType>>,
    format: SubscriptionFormat,
}

/// Stateful decoder of inbound ESP messages.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    subscriptions: HashMap<String, Subscription>,
    connected: bool,
}

impl MessageDecoder {
    /// Creates a decoder in the not-yet-connected state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Marks the connection as closed; the next handshake is accepted again.
    pub fn reset(&mut self) {
        self.connected = false;
    }

    /// Records a sent subscription so its schema and events can be matched.
    pub fn register(&mut self, subscription_id: &str, format: SubscriptionFormat) {
        self.subscriptions.insert(
            subscription_id.to_string(),
            Subscription { schema: None, format },
        );
    }

    /// Handles a text frame.
    pub fn handle_text(&mut self, text: &str) -> Result<Vec<ClientEvent>, EspClientError> {
        let mut events = Vec::new();
        if self.try_handshake(text.as_bytes(), &mut events) {
            return Ok(events);
        }

        match decode_json(text.as_bytes()) {
            Ok(message) => self.handle_message(&message, &mut events)?,
            Err(e) => log::error!("Cannot unmarshal text message ({}): {}", e, text),
        }
        Ok(events)
    }

    /// Handles a binary frame.
    pub fn handle_binary(&mut self, data: &[u8]) -> Result<Vec<ClientEvent>, EspClientError> {
        let mut events = Vec::new();
        if self.try_handshake(data, &mut events) {
            return Ok(events);
        }

        match decode_binary(data) {
            Ok(message) => self.handle_message(&message, &mut events)?,
            Err(e) => log::error!("Cannot unmarshal binary message of {} bytes: {}", data.len(), e),
        }
        Ok(events)
    }

    fn try_handshake(&mut self, data: &[u8], events: &mut Vec<ClientEvent>) -> bool {
        if self.connected || !data.starts_with(HANDSHAKE_PREFIX) {
            return false;
        }
        self.connected = true;
        events.push(ClientEvent::Connected);
        true
    }

    fn handle_message(&mut self, message: &WireValue, events: &mut Vec<ClientEvent>) -> Result<(), EspClientError> {
        match EspMessage::from_wire(message) {
            EspMessage::Schema {
                subscription_id,
                window,
                fields,
            } => {
                let mut schema = HashMap::with_capacity(fields.len());
                for field in fields {
                    schema.insert(field.name, field.type_name.parse::<SchemaType>()?);
                }
                log::debug!("Received schema for {} ({} fields)", window, schema.len());

                match self.subscriptions.get_mut(&subscription_id) {
                    Some(sub) => sub.schema = Some(schema),
                    None => log::warn!("Received schema for unknown subscription id {}", subscription_id),
                }
            }
            EspMessage::Events {
                subscription_id,
                entries,
            } => {
                log::debug!("Received event message, entries: {}", entries.len());
                for entry in &entries {
                    if let Some(event) = self.parse_event(&subscription_id, entry) {
                        events.push(ClientEvent::Window(event));
                    }
                }
            }
            EspMessage::Error(text) => {
                log::error!("Received error message: {}", text);
                return Err(EspClientError::Server(text));
            }
            EspMessage::ProjectLoaded(name) => {
                log::debug!("Received 'project-loaded' message: {}", name);
                events.push(ClientEvent::ProjectLoaded(name));
            }
            EspMessage::ProjectRemoved(name) => {
                log::debug!("Received 'project-removed' message: {}", name);
                events.push(ClientEvent::ProjectRemoved(name));
            }
            EspMessage::Bulk(encoded) => {
                for item in encoded {
                    let decoded = match general_purpose::STANDARD.decode(&item) {
                        Ok(bytes) => bytes,
                        Err(_) => {
                            log::error!("cannot decode base64 message: {}", item);
                            continue;
                        }
                    };
                    let inner = match decode_json(&decoded) {
                        Ok(inner) => inner,
                        Err(_) => {
                            log::error!("Cannot unmarshal message: {}", String::from_utf8_lossy(&decoded));
                            break;
                        }
                    };
                    self.handle_message(&inner, events)?;
                }
            }
            EspMessage::InfoDiscard { discarded, total } => {
                log::info!("Received 'info' message: Events discarded: {} out of {}", discarded, total);
            }
            EspMessage::Unknown => {
                log::error!("Unknown message type received. Message: {:?}", message);
            }
        }

        Ok(())
    }

    fn parse_event(&self, subscription_id: &str, entry: &WireValue) -> Option<WindowEvent> {
        if matches!(entry, WireValue::Null) {
            log::warn!("received nil event for subscription {}", subscription_id);
            return None;
        }

        let Some(sub) = self.subscriptions.get(subscription_id) else {
            log::error!("received event with unknown subscription id {}", subscription_id);
            return None;
        };

        let event = match sub.format {
            SubscriptionFormat::Json => match entry.get(JSON_EVENT_KEY) {
                Some(inner) => inner,
                None => {
                    log::error!("JSON event entry without '{}' key for subscription {}", JSON_EVENT_KEY, subscription_id);
                    return None;
                }
            },
            SubscriptionFormat::Cbor => entry,
        };

        let Some(schema) = sub.schema.as_ref() else {
            log::error!("no schema received for subscription {}", subscription_id);
            return None;
        };

        match parse_window_event(event, schema, sub.format) {
            Ok(event) => Some(event),
            Err(e) => {
                log::error!("error while parsing window event: {}", e);
                None
            }
        }
    }
}

/// Connection parameters of an ESP server.
#[derive(Debug, Clone)]
pub struct EspWsClient {
    url: Url,
    authorization: Option<String>,
}

impl EspWsClient {
    /// Creates a client for the given WebSocket URL, optionally sending an
    /// `Authorization` header on connect.
    pub fn new(url: Url, authorization: Option<String>) -> Self {
        Self { url, authorization }
    }

    /// The WebSocket URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Opens the socket. The handshake completes asynchronously and is
    /// reported as `ClientEvent::Connected` by `EspConnection::next_event`.
    pub async fn connect(&self) -> Result<EspConnection, EspClientError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(authorization) = &self.authorization {
            request
                .headers_mut()
                .insert(AUTHORIZATION, HeaderValue::from_str(authorization)?);
        }

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            log::error!("WebSocket error: {}, {}", self.url, e);
            EspClientError::from(e)
        })?;
        log::debug!("Opened WebSocket: {}", self.url);

        let (write, read) = ws_stream.split();
        Ok(EspConnection {
            write,
            read,
            decoder: MessageDecoder::new(),
            pending: VecDeque::new(),
        })
    }
}

/// An open ESP socket.
pub struct EspConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    decoder: MessageDecoder,
    pending: VecDeque<ClientEvent>,
}

impl EspConnection {
    /// Subscribes to a window and returns the subscription id
    /// (`project/cq/window/<uuid>`).
    pub async fn subscribe(&mut self, request: &SubscriptionRequest) -> Result<String, EspClientError> {
        let window = request.window_path();
        let id = format!("{}/{}", window, Uuid::new_v4());

        let message = SubscriptionMessage {
            event_stream: EventStreamMessage {
                interval: request.interval,
                max_events: request.max_events,
                action: "set".to_string(),
                id: id.clone(),
                window,
                schema: true,
                update_deletes: true,
                format: request.format,
                include: request.fields.clone(),
            },
        };
        let payload = serde_json::to_string(&message)?;

        self.decoder.register(&id, request.format);
        self.write.send(Message::Text(payload.clone().into())).await?;
        log::debug!("Subscribed to: {}", payload);

        Ok(id)
    }

    /// Waits for the next client event.
    pub async fn next_event(&mut self) -> Result<ClientEvent, EspClientError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let events = self.decoder.handle_text(text.as_str())?;
                    self.pending.extend(events);
                }
                Some(Ok(Message::Binary(data))) => {
                    let events = self.decoder.handle_binary(&data)?;
                    self.pending.extend(events);
                }
                Some(Ok(Message::Close(frame))) => {
                    log::debug!("WebSocket closed by server: {:?}", frame);
                    self.decoder.reset();
                    return Err(EspClientError::ConnectionClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::error!("WebSocket read error: {}", e);
                    self.decoder.reset();
                    return Err(e.into());
                }
                None => {
                    log::debug!("WebSocket stream ended");
                    self.decoder.reset();
                    return Err(EspClientError::ConnectionClosed);
                }
            }
        }
    }

    /// Closes the socket.
    pub async fn close(&mut self) {
        if let Err(e) = self.write.close().await {
            log::debug!("Error while closing WebSocket: {}", e);
        }
        self.decoder.reset();
    }
}
