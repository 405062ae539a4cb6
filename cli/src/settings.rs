//! The `--config` file: client stack, logging and simulator knobs in one YAML document.
//!
//! ```yaml
//! log:
//!   level: info
//!   components:
//!     callguard-core: debug
//! client:
//!   interceptors: [logging, basic_auth, timeout]
//!   unary_timeout_ms: 5000
//!   stream_timeout_ms: 20000
//!   circuit_breaker:
//!     name: course-circuit-breaker
//!     min_request_threshold: 3
//!     failure_ratio_threshold: 0.6
//!     open_timeout_ms: 4000
//!     max_probe_requests: 3
//! sim:
//!   delay_unit_ms: 1000
//!   server_replies: 3
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use callguard_core::{CircuitBreakerConfig, ClientConfig};
use callguard_sim::SimTransport;

use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log: LogConfig,
    pub client: ClientConfig,
    pub sim: SimSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub seed: Option<u64>,
    pub delay_unit_ms: u64,
    pub server_replies: u32,
    /// Make the simulator demand this exact `authorization` value.
    pub authorization: Option<String>,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            seed: None,
            delay_unit_ms: 1_000,
            server_replies: 3,
            authorization: None,
        }
    }
}

impl SimSettings {
    pub fn build(&self) -> SimTransport {
        let mut builder = SimTransport::builder()
            .delay_unit(Duration::from_millis(self.delay_unit_ms))
            .server_replies(self.server_replies);
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        if let Some(value) = &self.authorization {
            builder = builder.require_authorization(value.clone());
        }
        builder.build()
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        settings.client.validate()?;
        Ok(settings)
    }
}

/// Breaker settings used when the config file names none.
pub fn demo_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        name: "course-circuit-breaker".into(),
        min_request_threshold: 3,
        failure_ratio_threshold: 0.6,
        open_timeout: Duration::from_secs(4),
        max_probe_requests: 3,
        ..CircuitBreakerConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections() {
        let yaml = r#"
log:
  level: debug
  json: true
client:
  interceptors: [logging, timeout]
  unary_timeout_ms: 1500
sim:
  seed: 42
  delay_unit_ms: 10
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.log.level, "debug");
        assert!(settings.log.json);
        assert_eq!(settings.client.unary_timeout(), Duration::from_millis(1500));
        assert_eq!(settings.client.stream_timeout(), Duration::from_secs(20));
        assert_eq!(settings.sim.seed, Some(42));
        assert_eq!(settings.sim.server_replies, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Settings::load(Some(Path::new("/nonexistent/callguard.yaml"))).unwrap_err();
        assert!(err.to_string().contains("reading"));
    }

    #[test]
    fn demo_breaker_is_valid() {
        demo_breaker().validate().unwrap();
    }
}
