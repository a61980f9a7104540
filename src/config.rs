//! Configuration management for crabsignal
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment overrides of the form `CRABSIGNAL__<SECTION>__<KEY>`
//! (for example `CRABSIGNAL__IDENTITY__TOKEN`).

use crate::errors::SignalError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub identity: IdentityConfig,
    pub bus: BusConfig,
    pub api: ApiConfig,
    pub rtc: RtcConfig,
}

/// Who this harness is on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Opaque user identity; never parsed
    pub user_id: String,
    /// Bearer credential presented once at the bus handshake and on API calls
    pub token: String,
}

/// Message bus endpoint and destinations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// WebSocket URL of the STOMP endpoint
    pub url: String,
    /// Virtual host sent in the CONNECT frame
    pub host: String,
    /// Prefix of application destinations (`/app/call.accept`)
    pub app_prefix: String,
    /// Per-identity channel carrying call notifications
    pub call_channel: String,
    /// Per-identity channel carrying offer/answer/candidate signals
    pub signal_channel: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

/// Call-creation REST endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub default_category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub data_channel_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_id: "tester".to_string(),
            token: String::new(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            host: "localhost".to_string(),
            app_prefix: "/app".to_string(),
            call_channel: "/user/queue/call".to_string(),
            signal_channel: "/user/queue/webrtc".to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 2000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            default_category: "VIDEO".to_string(),
        }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            data_channel_label: "chat".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load defaults, the TOML file at `path` if it exists, and environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SignalError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let defaults = config::Config::try_from(&HarnessConfig::default())
            .map_err(|e| SignalError::Config(format!("Failed to build defaults: {}", e)))?;

        let config: HarnessConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("CRABSIGNAL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SignalError::Config(format!("Failed to load config: {}", e)))?;

        config.validate().map_err(SignalError::Config)?;
        log::info!("Loaded configuration for user {}", config.identity.user_id);
        Ok(config)
    }

    /// Parse a TOML document on its own, without file or environment layers.
    pub fn from_toml_str(contents: &str) -> Result<Self, SignalError> {
        toml::from_str(contents)
            .map_err(|e| SignalError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SignalError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SignalError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| SignalError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| SignalError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabsignal.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.identity.user_id.trim().is_empty() {
            return Err("identity.user_id must not be empty".to_string());
        }

        if !(self.bus.url.starts_with("ws://") || self.bus.url.starts_with("wss://")) {
            return Err(format!("bus.url must be a ws:// or wss:// URL, got {}", self.bus.url));
        }
        if self.bus.reconnect_delay_ms == 0 {
            return Err("bus.reconnect_delay_ms must be greater than zero".to_string());
        }
        for channel in [&self.bus.call_channel, &self.bus.signal_channel] {
            if !channel.starts_with('/') {
                return Err(format!("bus channel {} must start with '/'", channel));
            }
        }

        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://")) {
            return Err(format!(
                "api.base_url must be an http:// or https:// URL, got {}",
                self.api.base_url
            ));
        }

        if self.rtc.data_channel_label.is_empty() {
            return Err("rtc.data_channel_label must not be empty".to_string());
        }
        if self.rtc.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err("every ICE server needs at least one URL".to_string());
        }

        Ok(())
    }
}
