use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use lib_esp::plugin::{DatasourceJsonData, DatasourceSettings};

/// Config file read when no `--config-path` is given.
pub const DEFAULT_CONFIG_FILE: &str = "server_esp.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "ESP datasource bridge server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "ESP_PORT", help = "Port to listen on for viewer connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "ESP_BIND_ADDRESS", help = "Address to bind the listener to.")]
    pub bind_address: Option<String>,

    #[clap(long, env = "ESP_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "ESP_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "ESP_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "ESP_DATASOURCE_URL", help = "Discovery service or ESP server base URL.")]
    pub datasource_url: Option<String>,

    #[clap(long, env = "ESP_DATASOURCE_UID", help = "Datasource id used in live channel names.")]
    pub datasource_uid: Option<String>,

    #[clap(long, env = "ESP_USE_EXTERNAL_URL", help = "Connect to ESP servers with their external URL.")]
    pub use_external_esp_url: Option<bool>,

    #[clap(long, env = "ESP_OAUTH_PASS_THRU", help = "Forward the viewer's Authorization header to trusted servers.")]
    pub oauth_pass_thru: Option<bool>,

    #[clap(long, env = "ESP_TLS_SKIP_VERIFY", help = "Accept any TLS certificate from the datasource URL.")]
    pub tls_skip_verify: Option<bool>,

    #[clap(long, env = "ESP_DIRECT_TO_ESP", help = "The datasource URL is an ESP server, not a discovery service.")]
    pub direct_to_esp: Option<bool>,

    #[clap(long, env = "ESP_LIVE_CAPACITY", help = "Rows kept per buffered frame of a live channel.")]
    pub live_capacity: Option<usize>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            bind_address: other.bind_address.or(self.bind_address),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            datasource_url: other.datasource_url.or(self.datasource_url),
            datasource_uid: other.datasource_uid.or(self.datasource_uid),
            use_external_esp_url: other.use_external_esp_url.or(self.use_external_esp_url),
            oauth_pass_thru: other.oauth_pass_thru.or(self.oauth_pass_thru),
            tls_skip_verify: other.tls_skip_verify.or(self.tls_skip_verify),
            direct_to_esp: other.direct_to_esp.or(self.direct_to_esp),
            live_capacity: other.live_capacity.or(self.live_capacity),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(9003),
            bind_address: Some("0.0.0.0".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            datasource_uid: Some("esp".to_string()),
            use_external_esp_url: Some(false),
            oauth_pass_thru: Some(false),
            tls_skip_verify: Some(false),
            direct_to_esp: Some(false),
            live_capacity: Some(lib_esp::frames::live::DEFAULT_CAPACITY),
            ..Default::default()
        }
    }

    /// Settings of the datasource served by the bridge.
    pub fn datasource_settings(&self) -> anyhow::Result<DatasourceSettings> {
        let url = self
            .datasource_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no datasource URL configured (--datasource-url or ESP_DATASOURCE_URL)"))?;

        Ok(DatasourceSettings {
            uid: self.datasource_uid.clone().unwrap_or_else(|| "esp".to_string()),
            url,
            json_data: DatasourceJsonData {
                use_external_esp_url: self.use_external_esp_url.unwrap_or(false),
                oauth_pass_thru: self.oauth_pass_thru.unwrap_or(false),
                tls_skip_verify: self.tls_skip_verify.unwrap_or(false),
                direct_to_esp: self.direct_to_esp.unwrap_or(false),
            },
        })
    }
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }

    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Defaults, then the JSON config file, then environment variables and CLI
/// arguments (already folded together in `cli`).
pub fn resolve_config(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    current_config.merge(cli)
}

pub fn load_config() -> Config {
    resolve_config(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_overrides_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 7000, "logLevel": "debug", "datasourceUrl": "http://discovery:8080", "directToEsp": true}}"#
        )
        .unwrap();

        let cli = Config::try_parse_from([
            "server_esp",
            "--config-path",
            file.path().to_str().unwrap(),
            "--port",
            "7100",
        ])
        .unwrap();

        let config = resolve_config(cli);
        assert_eq!(config.port, Some(7100));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.bind_address.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.live_capacity, Some(lib_esp::frames::live::DEFAULT_CAPACITY));

        let settings = config.datasource_settings().unwrap();
        assert_eq!(settings.url, "http://discovery:8080");
        assert_eq!(settings.uid, "esp");
        assert!(settings.json_data.direct_to_esp);
        assert!(!settings.json_data.oauth_pass_thru);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "this is not json").unwrap();
        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let config = resolve_config(cli);
        assert_eq!(config.port, Some(9003));
        assert!(config.datasource_settings().is_err());
    }

    #[test]
    fn boolean_flags_take_values() {
        let cli = Config::try_parse_from(["server_esp", "--oauth-pass-thru", "true", "--datasource-url", "https://esp"])
            .unwrap();
        assert_eq!(cli.oauth_pass_thru, Some(true));
        assert_eq!(cli.datasource_url.as_deref(), Some("https://esp"));
    }
}
