// src/logging.rs
//! Logger setup for hosts that don't install their own `log` backend.

use log::LevelFilter;

#[derive(Clone, Copy, Debug)]
pub struct LoggingConfig {
    /// Explicit level. `None` uses Debug in debug builds and Warn in release.
    pub level: Option<LevelFilter>,
    pub timestamps: bool,
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            timestamps: true,
            show_target: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = Some(level);
        self
    }

    fn effective_level(&self) -> LevelFilter {
        self.level.unwrap_or(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
    }
}

/// Installs an `env_logger` backend. `RUST_LOG` overrides the configured level.
/// Safe to call more than once; only the first call installs anything.
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging(config: LoggingConfig) {
    static INIT: std::sync::Once = std::sync::Once::new();

    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(config.effective_level())
            .format_target(config.show_target);
        if config.timestamps {
            builder.format_timestamp_millis();
        } else {
            builder.format_timestamp(None);
        }
        builder.parse_default_env();

        // Another backend may already be installed by the host.
        if builder.try_init().is_err() {
            log::debug!("logger already installed, keeping the existing one");
        }
    });
}

#[cfg(target_arch = "wasm32")]
pub fn init_logging(_config: LoggingConfig) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_level_wins() {
        let config = LoggingConfig::default().with_level(LevelFilter::Trace);
        assert_eq!(config.effective_level(), LevelFilter::Trace);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(LoggingConfig::default());
        init_logging(LoggingConfig::default().with_level(LevelFilter::Error));
        log::info!("still alive");
    }
}
