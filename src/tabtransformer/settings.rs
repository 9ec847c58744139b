//! Process-level settings for the masked tab transformer.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    /// Log tensor shapes at debug level during forward passes.
    /// Seeds `ModelConfig::verbose`.
    pub log_shapes: bool,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self { log_shapes: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// Seed of the deterministic parameter initialization.
    /// Seeds `ModelConfig::seed`.
    pub seed: u64,

    /// Learning rate used by the demo binary.
    pub learning_rate: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            learning_rate: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Diagnostic output
    pub diagnostics: DiagnosticsSettings,

    /// Training defaults
    pub training: TrainingSettings,
}

impl Settings {
    /// Create a new Settings instance from environment variables and config files.
    /// Environment variables are prefixed with "MASKED_TAB__" and use "__" to
    /// separate sections, e.g. `MASKED_TAB__DIAGNOSTICS__LOG_SHAPES=true`.
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("diagnostics.log_shapes", false)?
            .set_default("training.seed", 0i64)?
            .set_default("training.learning_rate", 1e-3)?
            .add_source(File::with_name(".env").required(false))
            .add_source(Environment::with_prefix("MASKED_TAB").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Get the global settings instance, initializing it if necessary.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| {
        Settings::new().unwrap_or_else(|err| {
            log::warn!("Falling back to default settings: {err}");
            Settings::default()
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(!settings.diagnostics.log_shapes);
        assert_eq!(settings.training.seed, 0);
        assert_eq!(settings.training.learning_rate, 1e-3);
    }

    #[test]
    fn test_settings_new_with_defaults() {
        let settings = Settings::new().unwrap_or_else(|_| Settings::default());
        assert!(settings.training.learning_rate > 0.0);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).expect("Should serialize Settings");
        let deserialized: Settings = serde_json::from_str(&json).expect("Should deserialize Settings");
        assert_eq!(deserialized.training.seed, settings.training.seed);
        assert_eq!(deserialized.diagnostics.log_shapes, settings.diagnostics.log_shapes);
    }

    #[test]
    fn test_concurrent_settings_access() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::thread;

        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let _settings = settings();
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
