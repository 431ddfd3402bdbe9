//! # Datasource Settings
//!
//! Instance settings of a configured datasource and the JSON model of a
//! single panel query.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Options stored in the instance's JSON data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceJsonData {
    /// Connect with the server's external URL instead of the internal one.
    #[serde(default)]
    pub use_external_esp_url: bool,
    /// Forward the viewer's `Authorization` header to trusted servers.
    #[serde(default)]
    pub oauth_pass_thru: bool,
    /// Accept any TLS certificate from the datasource URL.
    #[serde(default)]
    pub tls_skip_verify: bool,
    /// The datasource URL is an ESP server rather than a discovery service.
    #[serde(default, rename = "DirectToEsp")]
    pub direct_to_esp: bool,
}

/// A configured datasource instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceSettings {
    /// Unique id, used as the namespace of live channels.
    pub uid: String,
    /// Discovery service or ESP server base URL.
    pub url: String,
    /// Options.
    #[serde(default)]
    pub json_data: DatasourceJsonData,
}

impl DatasourceSettings {
    /// Parses settings from JSON text.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Reads settings from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&text)?)
    }
}

/// JSON model of one panel query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryModel {
    /// Server URL reachable from outside the cluster.
    #[serde(default)]
    pub external_server_url: String,
    /// Server URL reachable from inside the cluster.
    #[serde(default)]
    pub internal_server_url: String,
    /// Project name.
    #[serde(default)]
    pub project_name: String,
    /// Continuous query name.
    #[serde(default)]
    pub cq_name: String,
    /// Window name.
    #[serde(default)]
    pub window_name: String,
    /// Fields to include.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Delivery interval in milliseconds.
    #[serde(default, rename = "intervalMs")]
    pub interval: u64,
    /// Maximum events per delivery.
    #[serde(default)]
    pub max_data_points: u64,
}

impl QueryModel {
    /// The server URL selected by `use_external`.
    pub fn server_url(&self, use_external: bool) -> &str {
        if use_external {
            &self.external_server_url
        } else {
            &self.internal_server_url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_data_names() {
        let settings = DatasourceSettings::from_json_str(
            r#"{"uid": "abc", "url": "http://discovery:8080",
                "jsonData": {"useExternalEspUrl": true, "oauthPassThru": true, "DirectToEsp": true}}"#,
        )
        .unwrap();
        assert_eq!(settings.uid, "abc");
        assert!(settings.json_data.use_external_esp_url);
        assert!(settings.json_data.oauth_pass_thru);
        assert!(!settings.json_data.tls_skip_verify);
        assert!(settings.json_data.direct_to_esp);
    }

    #[test]
    fn missing_json_data_defaults() {
        let settings = DatasourceSettings::from_json_str(r#"{"uid": "abc", "url": "http://esp"}"#).unwrap();
        assert_eq!(settings.json_data, DatasourceJsonData::default());
    }

    #[test]
    fn settings_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"uid": "f", "url": "https://esp", "jsonData": {{"tlsSkipVerify": true}}}}"#).unwrap();
        let settings = DatasourceSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.uid, "f");
        assert!(settings.json_data.tls_skip_verify);

        assert!(DatasourceSettings::from_file(std::path::Path::new("/nonexistent/esp.json")).is_err());
    }

    #[test]
    fn query_model_fields() {
        let model: QueryModel = serde_json::from_str(
            r#"{"externalServerUrl": "wss://ext:1", "internalServerUrl": "ws://int:2",
                "projectName": "p", "cqName": "cq", "windowName": "w",
                "fields": ["a"], "intervalMs": 250, "maxDataPoints": 100, "refId": "A"}"#,
        )
        .unwrap();
        assert_eq!(model.server_url(true), "wss://ext:1");
        assert_eq!(model.server_url(false), "ws://int:2");
        assert_eq!(model.interval, 250);
        assert_eq!(model.max_data_points, 100);
    }
}
