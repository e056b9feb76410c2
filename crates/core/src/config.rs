use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::model::Placement;
use crate::service::http::HttpStreamServiceConfig;
use crate::{Error, Result};

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub version: u32,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub backup: BackupDefaults,
    #[serde(default)]
    pub restore: RestoreDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub url: String,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDefaults {
    #[serde(default = "default_true")]
    pub consumers: bool,
    #[serde(default)]
    pub check: bool,
    #[serde(default)]
    pub critical_warnings: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreDefaults {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8222/jsm".to_string(),
            token_env: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for BackupDefaults {
    fn default() -> Self {
        Self {
            consumers: true,
            check: false,
            critical_warnings: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_SCHEMA_VERSION,
            service: ServiceSettings::default(),
            backup: BackupDefaults::default(),
            restore: RestoreDefaults::default(),
        }
    }
}

impl RestoreDefaults {
    pub fn placement(&self) -> Placement {
        Placement::new(self.cluster.clone(), self.tags.clone())
    }
}

impl ServiceSettings {
    pub fn http_config(&self) -> Result<HttpStreamServiceConfig> {
        let token = match &self.token_env {
            Some(var) => Some(std::env::var(var).map_err(|_| Error::InvalidConfig {
                message: format!("service.token_env: environment variable {var} is not set"),
            })?),
            None => None,
        };
        Ok(HttpStreamServiceConfig {
            base_url: self.url.clone(),
            token,
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;

    let settings = parse_settings(&text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })?;
    validate_settings(&settings)?;
    Ok(settings)
}

pub fn parse_settings(text: &str) -> std::result::Result<Settings, toml::de::Error> {
    let raw: toml::Value = toml::from_str(text)?;
    let version = raw
        .get("version")
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok());

    match version {
        Some(SETTINGS_SCHEMA_VERSION) => toml::from_str::<Settings>(text),
        Some(other) => Err(toml::de::Error::custom(format!(
            "unsupported settings schema version: {other} (expected {SETTINGS_SCHEMA_VERSION})"
        ))),
        None => Err(toml::de::Error::custom("missing settings schema version")),
    }
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.version != SETTINGS_SCHEMA_VERSION {
        return Err(Error::InvalidConfig {
            message: format!(
                "settings.version must be {SETTINGS_SCHEMA_VERSION} (got {})",
                settings.version
            ),
        });
    }

    let url = settings.service.url.trim();
    if url.is_empty() {
        return Err(Error::InvalidConfig {
            message: "service.url must not be empty".to_string(),
        });
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::InvalidConfig {
            message: format!("service.url must be http(s) (got {url:?})"),
        });
    }
    if settings.service.timeout_ms == 0 {
        return Err(Error::InvalidConfig {
            message: "service.timeout_ms must be > 0".to_string(),
        });
    }
    if let Some(var) = &settings.service.token_env
        && var.trim().is_empty()
    {
        return Err(Error::InvalidConfig {
            message: "service.token_env must not be empty".to_string(),
        });
    }
    if settings.restore.tags.iter().any(|t| t.trim().is_empty()) {
        return Err(Error::InvalidConfig {
            message: "restore.tags must not contain empty tags".to_string(),
        });
    }
    Ok(())
}
