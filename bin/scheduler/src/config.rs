//! Coordinator configuration, loaded via the `config` crate from
//! `FLOWGRID_`-prefixed environment variables.

use serde::Deserialize;

/// Coordinator daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Address to bind the HTTP listener to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind the HTTP listener to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted size of a workflow submission body, in bytes.
    #[serde(default = "default_max_payload_length")]
    pub max_payload_length: usize,

    /// Root directory for per-run container storage.
    #[serde(default = "default_var_dir")]
    pub var_dir: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_payload_length() -> usize {
    8 * 1024 * 1024
}

fn default_var_dir() -> String {
    "/var/flowgrid".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_payload_length: default_max_payload_length(),
            var_dir: default_var_dir(),
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but unparsable.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("FLOWGRID")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_has_usable_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_payload_length, 8 * 1024 * 1024);
        assert!(!config.var_dir.is_empty());
    }
}
