//! ESP server WebSocket endpoint addressing.

use thiserror::Error;
use url::Url;

/// Path of the streaming endpoint below the server's base path.
const CONNECT_PATH: &str = "eventStreamProcessing/v2/connect";

/// Failure to derive a server's WebSocket URL.
#[derive(Debug, Error)]
pub enum ServerUrlError {
    /// The input is not a URL.
    #[error("invalid server URL: {0}")]
    Parse(#[from] url::ParseError),

    /// The URL has no host part.
    #[error("server URL has no host: {0}")]
    MissingHost(String),
}

/// An ESP server, identified by its WebSocket connect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspServer {
    url: Url,
}

impl EspServer {
    /// Builds `ws[s]://host[:port]/<path>/eventStreamProcessing/v2/connect`.
    /// A leading `/` of `path` is ignored.
    pub fn new(is_tls: bool, host: &str, port: Option<u16>, path: &str) -> Result<Self, ServerUrlError> {
        let scheme = if is_tls { "wss" } else { "ws" };
        let authority = match port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let base = path.trim_start_matches('/').trim_end_matches('/');
        let full_path = if base.is_empty() {
            CONNECT_PATH.to_string()
        } else {
            format!("{}/{}", base, CONNECT_PATH)
        };

        let url = Url::parse(&format!("{}://{}/{}", scheme, authority, full_path))?;
        Ok(Self { url })
    }

    /// Derives the server from a configured URL. Scheme `wss` selects TLS;
    /// any other scheme connects in plain text.
    pub fn from_url_string(input: &str) -> Result<Self, ServerUrlError> {
        let parsed = Url::parse(input)?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ServerUrlError::MissingHost(input.to_string()))?;

        Self::new(parsed.scheme() == "wss", host, parsed.port(), parsed.path())
    }

    /// The WebSocket connect URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_connect_url_from_parts() {
        let server = EspServer::new(true, "esp.example", Some(31415), "/SASESP").unwrap();
        assert_eq!(
            server.url().as_str(),
            "wss://esp.example:31415/SASESP/eventStreamProcessing/v2/connect"
        );

        let plain = EspServer::new(false, "esp.example", None, "").unwrap();
        assert_eq!(plain.url().as_str(), "ws://esp.example/eventStreamProcessing/v2/connect");
    }

    #[test]
    fn from_url_string_keeps_port_and_tls() {
        let server = EspServer::from_url_string("wss://host:12345").unwrap();
        assert_eq!(server.url().as_str(), "wss://host:12345/eventStreamProcessing/v2/connect");

        let plain = EspServer::from_url_string("http://host:8080/base/").unwrap();
        assert_eq!(plain.url().as_str(), "ws://host:8080/base/eventStreamProcessing/v2/connect");
    }

    #[test]
    fn rejects_garbage() {
        assert!(EspServer::from_url_string("no scheme here").is_err());
        assert!(EspServer::from_url_string("").is_err());
    }
}
