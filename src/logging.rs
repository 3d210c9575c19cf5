//! Logging setup for component-resolver
//!
//! Resolution events are emitted through `tracing` under the
//! `component_resolver` target. This module installs a subscriber for them.
//!
//! # Features
//!
//! - `logging` - Emit resolution events (default)
//! - `logging-json` - JSON structured subscriber output
//! - `logging-pretty` - Colorful multi-line subscriber output
//!
//! # Example
//!
//! ```rust,ignore
//! use component_resolver::logging;
//!
//! // JSON if logging-json is enabled, pretty otherwise
//! logging::init();
//!
//! // Only resolver events, at trace level, with thread ids
//! logging::builder()
//!     .trace()
//!     .resolver_only()
//!     .with_thread_ids()
//!     .compact()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Target used by every event this crate emits
pub const TARGET: &str = "component_resolver";

/// Subscriber output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured output
    #[default]
    Json,
    /// Multi-line colorful output
    Pretty,
    /// Single-line output
    Compact,
}

/// Subscriber configuration
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    from_env: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            from_env: false,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum level to emit
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Shows cache hits and parent delegation
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Shows creation, merging and registration
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    pub fn error(self) -> Self {
        self.with_level(Level::ERROR)
    }

    /// Only emit events from `target`
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only emit component-resolver events
    pub fn resolver_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    /// Prefer `RUST_LOG` over the configured level and target when it is set
    pub fn from_env(mut self) -> Self {
        self.from_env = true;
        self
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Filter directive for the configured level and target
    #[cfg_attr(not(any(feature = "logging-json", feature = "logging-pretty")), allow(dead_code))]
    fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber globally.
    ///
    /// Returns false when a global subscriber was already installed.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> bool {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = if self.from_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
        } else {
            EnvFilter::new(self.directive())
        };

        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_thread_names(self.with_thread_names)
            .with_target(true);
        let registry = tracing_subscriber::registry().with(filter);

        match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => registry.with(layer.json()).try_init().is_ok(),
            // Without the json feature fall back to the default line format
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => registry.with(layer).try_init().is_ok(),
            LogFormat::Pretty => registry.with(layer.pretty()).try_init().is_ok(),
            LogFormat::Compact => registry.with(layer.compact()).try_init().is_ok(),
        }
    }

    /// No subscriber is available without `logging-json` or `logging-pretty`
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn try_init(self) -> bool {
        false
    }

    /// Install the subscriber globally, ignoring an already installed one
    pub fn init(self) {
        let _ = self.try_init();
    }
}

/// Start configuring a subscriber
#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Install the default subscriber: JSON with `logging-json`, pretty with `logging-pretty`
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init() {
    #[cfg(feature = "logging-json")]
    init_json();
    #[cfg(all(feature = "logging-pretty", not(feature = "logging-json")))]
    init_pretty();
}

#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
pub fn init() {}

/// Install a JSON subscriber at debug level
///
/// # Example output
/// ```json
/// {"timestamp":"2026-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Creating component instance","component":"repository","scope":"singleton","depth":0},"target":"component_resolver"}
/// ```
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init_json() {
    builder().json().debug().init();
}

#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
pub fn init_json() {}

/// Install a pretty subscriber at debug level
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init_pretty() {
    builder().pretty().debug().init();
}

#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
pub fn init_pretty() {}

/// Install a subscriber that only shows component-resolver events
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init_resolver_only() {
    builder().resolver_only().debug().init();
}

#[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
pub fn init_resolver_only() {}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
        assert_eq!(builder.directive(), "DEBUG");
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .compact()
            .with_file()
            .with_thread_ids()
            .resolver_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Compact);
        assert!(builder.with_file);
        assert!(builder.with_thread_ids);
        assert!(!builder.with_line_number);
        assert_eq!(builder.directive(), "component_resolver=TRACE");
    }
}
