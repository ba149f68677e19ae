//! Logging configuration for term-detect.
//!
//! Detection runs log through `tracing`. [`LogConfig`] gates the chattier
//! per-rule and per-extraction events so that large runs stay quiet by
//! default, and [`setup::init_logging`] installs a subscriber for binaries
//! and demos.

use tracing::Level;

/// Controls which detection events are emitted.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level for term-detect components
    pub base_level: Level,
    /// Whether to log each rule as it is created and applied
    pub log_rule_details: bool,
    /// Whether to log feature extraction (fetching, decoding)
    pub log_extraction: bool,
    /// Whether to log the run summary
    pub log_summary: bool,
    /// Maximum length for logged field values such as error messages
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_rule_details: false,
            log_extraction: true,
            log_summary: true,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Everything on, at debug level.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_rule_details: true,
            log_extraction: true,
            log_summary: true,
            max_field_length: 1024,
        }
    }

    /// Warnings only.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_rule_details: false,
            log_extraction: false,
            log_summary: false,
            max_field_length: 128,
        }
    }
}

/// Debug event for a single rule, emitted only when rule details are enabled.
#[macro_export]
macro_rules! log_rule {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_rule_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Info event for feature extraction, emitted only when enabled.
#[macro_export]
macro_rules! log_extraction {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_extraction {
            tracing::info!($($arg)*);
        }
    };
}

/// Truncates `value` to at most `max_length` characters.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    match value.char_indices().nth(max_length) {
        None => value.to_string(),
        Some((end, _)) => format!("{}...(truncated)", &value[..end]),
    }
}

/// Subscriber setup.
pub mod setup {
    use tracing::Level;

    /// How [`init_logging`] builds the subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for everything outside term-detect
        pub level: Level,
        /// Log level for term-detect itself
        pub detect_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                detect_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// JSON output, warnings outside the crate.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                detect_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                detect_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_detect_level(mut self, level: Level) -> Self {
            self.detect_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// The filter directive string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},term_detect={}",
                    self.level.as_str().to_lowercase(),
                    self.detect_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs a global `tracing` subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured filter. Fails if a
    /// global subscriber is already set.
    ///
    /// ```rust,no_run
    /// use term_detect::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::development().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}
