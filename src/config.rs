use std::{collections::HashMap, time::Duration};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Timing knobs of the reader protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// A connection is closed when no frame arrives within this window.
    pub heartbeat_timeout_secs: u64,
    /// How long a reader waits for a tap after a keypad selection. `0` disables the timeout.
    pub selection_timeout_secs: u64,
    /// Pause between an error display and the restart of the tap loop.
    pub settle_delay_ms: u64,
    /// Duration sent with display messages of the tap loop and resource selection.
    pub message_duration_ms: u64,
    /// Duration sent with display messages of enrollment and reset.
    pub provisioning_message_duration_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 30,
            selection_timeout_secs: 30,
            settle_delay_ms: 200,
            message_duration_ms: 3000,
            provisioning_message_duration_ms: 10_000,
        }
    }
}

impl GatewayConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn selection_timeout(&self) -> Option<Duration> {
        (self.selection_timeout_secs > 0).then(|| Duration::from_secs(self.selection_timeout_secs))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let defaults = GatewayConfig::default();
        let mut builder = ConfigLib::builder()
            .set_default("server.host", "localhost")?
            .set_default("server.port", 3000)?
            .set_default("gateway.heartbeat_timeout_secs", defaults.heartbeat_timeout_secs)?
            .set_default("gateway.selection_timeout_secs", defaults.selection_timeout_secs)?
            .set_default("gateway.settle_delay_ms", defaults.settle_delay_ms)?
            .set_default("gateway.message_duration_ms", defaults.message_duration_ms)?
            .set_default(
                "gateway.provisioning_message_duration_ms",
                defaults.provisioning_message_duration_ms,
            )?
            .add_source(File::with_name("config/settings").required(false));

        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format APP_SERVER__HOST or APP_GATEWAY__HEARTBEAT_TIMEOUT_SECS
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
