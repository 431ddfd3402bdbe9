//! # Server Discovery
//!
//! Lists the ESP servers a datasource can reach, either from the discovery
//! service (`/grafana/discovery`, JSON) or straight from one ESP server's
//! `runningProjects?schema=true` XML.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use url::Url;

use crate::retrieve::http_client::{ApiClient, ACCEPT_JSON, ACCEPT_XML};

/// Discovery service endpoint.
pub const DISCOVERY_PATH: &str = "/grafana/discovery";
/// ESP endpoint listing running projects.
pub const RUNNING_PROJECTS_PATH: &str = "/runningProjects";
/// Server name used when an ESP server runs no projects.
pub const UNKNOWN_SERVER_NAME: &str = "(Unknown)";

/// Failure to list servers.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The request could not be completed.
    #[error(transparent)]
    Request(#[from] anyhow::Error),

    /// The endpoint answered 401.
    #[error("Connection to {0} rejected due to unauthorized credentials.")]
    Unauthorized(&'static str),

    /// The endpoint answered with another non-200 status.
    #[error("The {service} sent an unexpected HTTP status code: {status}")]
    UnexpectedStatus {
        /// Which endpoint answered.
        service: &'static str,
        /// The status code.
        status: u16,
    },

    /// The discovery body is not a server list.
    #[error("unable to unmarshal discovery response")]
    InvalidDiscoveryResponse(#[source] serde_json::Error),

    /// The running projects body is not valid XML.
    #[error("unable to unmarshal ESP running projects response")]
    InvalidRunningProjects(String),
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A window field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
}

/// A window and its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Window name.
    pub name: String,
    /// Schema fields.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub fields: Vec<FieldInfo>,
}

/// A continuous query and its windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousQuery {
    /// Continuous query name.
    pub name: String,
    /// Windows of the query.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub windows: Vec<Window>,
}

/// A running project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Project name.
    pub name: String,
    /// Continuous queries of the project.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub continuous_queries: Vec<ContinuousQuery>,
}

/// An ESP server as listed to the query editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Running projects.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub projects: Vec<Project>,
    /// Display name.
    pub name: String,
    /// URL reachable from the backend.
    pub url: String,
    /// URL reachable from outside the cluster.
    #[serde(default)]
    pub external_url: String,
    /// Whether credentials may be forwarded to this server.
    #[serde(default)]
    pub trusted: bool,
}

fn name_attribute(element: &BytesStart<'_>) -> String {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"name")
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
        .unwrap_or_default()
}

/// Applies one opening (or self-closing) element to the project tree, given
/// the names of its open ancestors.
fn visit_element(projects: &mut Vec<Project>, ancestors: &[String], element: &BytesStart<'_>) {
    let tag = element.name();
    let tag = tag.as_ref();
    let path: Vec<&str> = ancestors.iter().map(String::as_str).collect();

    match (path.as_slice(), tag) {
        ([_root], b"project") => projects.push(Project {
            name: name_attribute(element),
            continuous_queries: Vec::new(),
        }),
        ([_, "project", "contqueries"], b"contquery") => {
            if let Some(project) = projects.last_mut() {
                project.continuous_queries.push(ContinuousQuery {
                    name: name_attribute(element),
                    windows: Vec::new(),
                });
            }
        }
        ([_, "project", "contqueries", "contquery", "windows"], _) => {
            if let Some(cq) = projects.last_mut().and_then(|p| p.continuous_queries.last_mut()) {
                cq.windows.push(Window {
                    name: name_attribute(element),
                    fields: Vec::new(),
                });
            }
        }
        ([_, "project", "contqueries", "contquery", "windows", _, "schema", "fields"], b"field") => {
            if let Some(window) = projects
                .last_mut()
                .and_then(|p| p.continuous_queries.last_mut())
                .and_then(|cq| cq.windows.last_mut())
            {
                window.fields.push(FieldInfo {
                    name: name_attribute(element),
                });
            }
        }
        _ => {}
    }
}

/// Converts a `runningProjects?schema=true` document into a single trusted
/// server entry. `base_url` is the ESP server's HTTP URL; its scheme is
/// mapped to the WebSocket equivalent.
pub fn parse_running_projects(xml: &str, base_url: &str) -> Result<ServerInfo, DiscoveryError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut ancestors: Vec<String> = Vec::new();
    let mut projects: Vec<Project> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                visit_element(&mut projects, &ancestors, &e);
                ancestors.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
            }
            Ok(Event::Empty(e)) => visit_element(&mut projects, &ancestors, &e),
            Ok(Event::End(_)) => {
                ancestors.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DiscoveryError::InvalidRunningProjects(e.to_string())),
            _ => {}
        }
    }

    if !ancestors.is_empty() {
        return Err(DiscoveryError::InvalidRunningProjects(format!(
            "unclosed element <{}>",
            ancestors.join("/")
        )));
    }

    let name = projects
        .first()
        .map(|p| p.name.clone())
        .unwrap_or_else(|| UNKNOWN_SERVER_NAME.to_string());
    let url = websocket_base_url(base_url);

    Ok(ServerInfo {
        projects,
        name,
        url: url.clone(),
        external_url: url,
        trusted: true,
    })
}

/// `http` becomes `ws` and `https` becomes `wss`; other URLs are kept as is.
fn websocket_base_url(base_url: &str) -> String {
    let Ok(mut url) = Url::parse(base_url) else {
        return base_url.to_string();
    };

    let scheme = match url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        if url.set_scheme(scheme).is_err() {
            log::warn!("Cannot change scheme of {} to {}", base_url, scheme);
        }
    }

    url.as_str().trim_end_matches('/').to_string()
}

/// Fetches the server list from the discovery service.
pub async fn fetch_from_discovery(
    client: &ApiClient,
    authorization: Option<&str>,
) -> Result<Vec<ServerInfo>, DiscoveryError> {
    log::debug!("Calling discovery endpoint {}", client.endpoint(DISCOVERY_PATH));

    let response = client.get(DISCOVERY_PATH, ACCEPT_JSON, authorization).await.map_err(|e| {
        log::error!("Unable to receive discovery response: {}", e);
        DiscoveryError::Request(e)
    })?;

    match response.status {
        200 => {}
        401 => {
            log::debug!(
                "Discovery service authorization failure, authorization header present: {}",
                authorization.is_some()
            );
            return Err(DiscoveryError::Unauthorized("discovery endpoint"));
        }
        status => {
            return Err(DiscoveryError::UnexpectedStatus {
                service: "discovery service",
                status,
            })
        }
    }

    serde_json::from_str(&response.body).map_err(|e| {
        log::error!("Invalid discovery response: {}", e);
        DiscoveryError::InvalidDiscoveryResponse(e)
    })
}

/// Fetches the running projects of the ESP server behind `client`.
pub async fn fetch_from_esp_server(
    client: &ApiClient,
    authorization: Option<&str>,
) -> Result<ServerInfo, DiscoveryError> {
    let path = format!("{}?schema=true", RUNNING_PROJECTS_PATH);
    log::debug!("Calling ESP server endpoint {}", client.endpoint(&path));

    let response = client.get(&path, ACCEPT_XML, authorization).await.map_err(|e| {
        log::error!("Unable to receive running projects response: {}", e);
        DiscoveryError::Request(e)
    })?;

    match response.status {
        200 => {}
        401 => {
            log::debug!(
                "ESP server authorization failure, authorization header present: {}",
                authorization.is_some()
            );
            return Err(DiscoveryError::Unauthorized("ESP server endpoint"));
        }
        status => {
            log::debug!("Unexpected ESP server response: {}", response.body);
            return Err(DiscoveryError::UnexpectedStatus {
                service: "ESP server",
                status,
            });
        }
    }

    log::debug!("Received ESP server running projects response: {}", response.body);
    parse_running_projects(&response.body, client.base_url())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUNNING_PROJECTS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<projects>
  <project name="trades" pubsub="auto" threads="1">
    <contqueries>
      <contquery name="cq1">
        <windows>
          <window-source name="src" insert-only="true">
            <schema>
              <fields>
                <field name="id" type="int64" key="true"/>
                <field name="price" type="double"/>
              </fields>
            </schema>
          </window-source>
          <window-aggregate name="agg">
            <schema><fields><field name="symbol" type="string" key="true"/></fields></schema>
          </window-aggregate>
        </windows>
        <edges><edge source="src" target="agg"/></edges>
      </contquery>
    </contqueries>
  </project>
  <project name="other"/>
</projects>"#;

    #[test]
    fn running_projects_become_one_trusted_server() {
        let server = parse_running_projects(RUNNING_PROJECTS, "https://esp.example:8443/").unwrap();
        assert_eq!(server.name, "trades");
        assert_eq!(server.url, "wss://esp.example:8443");
        assert_eq!(server.external_url, server.url);
        assert!(server.trusted);

        assert_eq!(server.projects.len(), 2);
        let cq = &server.projects[0].continuous_queries[0];
        assert_eq!(cq.name, "cq1");
        let windows: Vec<_> = cq.windows.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(windows, ["src", "agg"]);
        let fields: Vec<_> = cq.windows[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(fields, ["id", "price"]);
        assert!(server.projects[1].continuous_queries.is_empty());
    }

    #[test]
    fn no_projects_gives_unknown_name() {
        let server = parse_running_projects("<projects/>", "http://esp:9900").unwrap();
        assert_eq!(server.name, UNKNOWN_SERVER_NAME);
        assert_eq!(server.url, "ws://esp:9900");
        assert!(server.projects.is_empty());
    }

    #[test]
    fn malformed_xml_is_rejected() {
        let err = parse_running_projects("<projects><project name=\"p\">", "http://esp").unwrap_err();
        assert_eq!(err.to_string(), "unable to unmarshal ESP running projects response");
    }

    #[test]
    fn server_info_json_is_camel_case() {
        let server = ServerInfo {
            projects: vec![Project {
                name: "p".into(),
                continuous_queries: vec![],
            }],
            name: "p".into(),
            url: "ws://esp".into(),
            external_url: "wss://esp.example".into(),
            trusted: false,
        };
        let value = serde_json::to_value(&server).unwrap();
        assert_eq!(value["externalUrl"], "wss://esp.example");
        assert_eq!(value["projects"][0]["continuousQueries"], serde_json::json!([]));

        let parsed: ServerInfo = serde_json::from_str(
            r#"{"projects": null, "name": "n", "url": "ws://a", "externalUrl": "wss://b", "trusted": true}"#,
        )
        .unwrap();
        assert!(parsed.projects.is_empty());
        assert!(parsed.trusted);
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            DiscoveryError::Unauthorized("discovery endpoint").to_string(),
            "Connection to discovery endpoint rejected due to unauthorized credentials."
        );
        assert_eq!(
            DiscoveryError::UnexpectedStatus {
                service: "ESP server",
                status: 503
            }
            .to_string(),
            "The ESP server sent an unexpected HTTP status code: 503"
        );
    }
}
