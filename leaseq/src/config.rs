//! Configuration management

use anyhow::{bail, Context};
use leaseq_queue::{QueueDefaults, QueueOptions};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,

    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_visibility_timeout_secs")]
    pub default_visibility_timeout_secs: u64,

    #[serde(default = "default_ttl_secs")]
    pub max_ttl_secs: u64,

    #[serde(default = "default_max_visibility_timeout_secs")]
    pub max_visibility_timeout_secs: u64,

    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    /// Expired-message sweep period, 0 disables the sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            default_ttl_secs: default_ttl_secs(),
            default_visibility_timeout_secs: default_visibility_timeout_secs(),
            max_ttl_secs: default_ttl_secs(),
            max_visibility_timeout_secs: default_max_visibility_timeout_secs(),
            max_content_bytes: default_max_content_bytes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_queue_name() -> String {
    "default".to_string()
}

fn default_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_max_visibility_timeout_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_content_bytes() -> usize {
    64 * 1024
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Without an explicit path, `leaseq.{toml,yaml,json}` in the working
    /// directory is read if present. Variables such as `LEASEQ_QUEUE__NAME`
    /// (prefix joined by `_`, nesting by `__`) override file values.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name("leaseq").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("LEASEQ")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?;

        let config: Config = config
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let queue = &self.queue;
        if queue.name.trim().is_empty() {
            bail!("queue name is missing");
        }
        if queue.default_ttl_secs == 0 || queue.default_ttl_secs > queue.max_ttl_secs {
            bail!(
                "default ttl {}s must be between 1 and the {}s maximum",
                queue.default_ttl_secs,
                queue.max_ttl_secs
            );
        }
        if queue.default_visibility_timeout_secs > queue.max_visibility_timeout_secs {
            bail!(
                "default visibility timeout {}s exceeds the {}s maximum",
                queue.default_visibility_timeout_secs,
                queue.max_visibility_timeout_secs
            );
        }
        Ok(())
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            max_ttl: Duration::from_secs(self.queue.max_ttl_secs),
            max_visibility_timeout: Duration::from_secs(self.queue.max_visibility_timeout_secs),
            max_content_bytes: self.queue.max_content_bytes,
        }
    }

    pub fn queue_defaults(&self) -> QueueDefaults {
        QueueDefaults {
            ttl: Duration::from_secs(self.queue.default_ttl_secs),
            visibility_timeout: Duration::from_secs(self.queue.default_visibility_timeout_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.queue.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.queue.name, "default");
        assert_eq!(config.queue_defaults().visibility_timeout, Duration::from_secs(30));
        assert_eq!(config.queue_options().max_content_bytes, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[queue]
name = "orders"
default_visibility_timeout_secs = 45
sweep_interval_secs = 0
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.queue.name, "orders");
        assert_eq!(config.queue.default_visibility_timeout_secs, 45);
        assert!(config.sweep_interval().is_zero());
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nhost = \"10.0.0.1\"").unwrap();

        // no other test reads server.host
        std::env::set_var("LEASEQ_SERVER__HOST", "127.0.0.2");
        let config = Config::load(Some(file.path()));
        std::env::remove_var("LEASEQ_SERVER__HOST");

        assert_eq!(config.unwrap().server.host, "127.0.0.2");
    }

    #[test]
    fn test_rejects_default_ttl_above_max() {
        let mut config = Config::default();
        config.queue.max_ttl_secs = 60;
        config.queue.default_ttl_secs = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_blank_queue_name() {
        let mut config = Config::default();
        config.queue.name = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
