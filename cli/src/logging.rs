//! Tracing initialisation for the `callguard` binary.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The `log` section of the settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter applied to everything not listed in `components`.
    pub level: String,
    /// Per-crate levels, keyed by package name (`callguard-core: debug`).
    pub components: BTreeMap<String, String>,
    /// One JSON object per event instead of the compact text format.
    pub json: bool,
    /// Prefix text lines with the emitting module path.
    pub targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
            targets: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `info,callguard_core=debug`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured levels.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(config.targets))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_normalise_component_names() {
        let mut config = LogConfig::default();
        config.components.insert("callguard-core".into(), "debug".into());
        config.components.insert("callguard-sim".into(), "trace".into());
        assert_eq!(
            config.directives(),
            "info,callguard_core=debug,callguard_sim=trace"
        );
    }

    #[test]
    fn section_defaults_fill_missing_keys() {
        let config: LogConfig = serde_yaml::from_str("json: true").unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
        assert!(!config.targets);
        assert_eq!(config.directives(), "info");
    }
}
