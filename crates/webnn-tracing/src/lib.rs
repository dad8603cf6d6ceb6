//! Tracing setup shared by the WebNN engine crates, their tests and benches.
//!
//! Binaries and test harnesses install a subscriber through
//! [`init_global_tracing`]; library code only emits events. The presets mirror
//! the three environments the engine runs in:
//!
//! - [`TracingConfig::for_local`]: pretty, coloured output for development
//! - [`TracingConfig::for_ci`]: JSON lines without ANSI codes
//! - [`TracingConfig::for_performance`]: JSON plus span close timings for the
//!   graph compilation and execution paths

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::error::Error;
use std::fmt;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Directive used by the performance preset; covers every engine crate.
const ENGINE_DEBUG_DIRECTIVES: &str = "webnn_core=debug,webnn_backends=debug,webnn_graph=debug";

/// How the shared subscriber should format and filter events.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Explicit filter directives. When absent `RUST_LOG` is consulted, then
    /// [`TracingConfig::default_directive`].
    pub directives: Option<String>,
    /// Fallback directive when nothing else resolves.
    pub default_directive: String,
    /// Print event targets (module paths).
    pub include_targets: bool,
    /// ANSI colouring.
    pub ansi: bool,
    /// Span lifecycle events to emit.
    pub span_events: FmtSpan,
    /// Formatter output.
    pub output: TracingOutput,
    /// Performance spans shorter than this are not logged.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Pretty, ANSI-enabled output for local development.
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            performance_threshold_us: None,
        }
    }

    /// JSON output without colour codes, for CI and log collectors.
    pub fn for_ci() -> Self {
        Self {
            ansi: false,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// JSON output with span close events and debug level for the engine crates.
    ///
    /// Close events carry `time.busy`/`time.idle`, which is what the
    /// `create_graph` and `compute` spans are read for.
    pub fn for_performance() -> Self {
        Self {
            directives: Some(ENGINE_DEBUG_DIRECTIVES.to_string()),
            ansi: false,
            span_events: FmtSpan::CLOSE,
            output: TracingOutput::Json,
            ..Self::for_local()
        }
    }

    /// Build a configuration from environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `WEBNN_TRACING_PROFILE` - `local` (default), `ci` or `performance`
    /// - `WEBNN_TRACING_DIRECTIVES` - overrides the filter directives
    /// - `WEBNN_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `WEBNN_PERF_THRESHOLD_US` - minimum performance span duration to log
    pub fn from_env() -> Self {
        let profile = env::var("WEBNN_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "performance" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("WEBNN_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("WEBNN_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if config.output == TracingOutput::Json {
                    config.ansi = false;
                }
            }
        }

        if let Ok(threshold) = env::var("WEBNN_PERF_THRESHOLD_US") {
            if let Ok(threshold_us) = threshold.trim().parse::<u64>() {
                config.performance_threshold_us = Some(threshold_us);
            }
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }
}

/// Formatter output choices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Failure to configure or install the subscriber.
#[derive(Debug)]
pub enum TracingSetupError {
    /// The directive string could not be parsed.
    InvalidFilter(String),
    /// A global subscriber is already installed.
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => write!(f, "invalid tracing directive: {msg}"),
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            TracingSetupError::InvalidFilter(_) => None,
        }
    }
}

/// Build a subscriber for the given configuration without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    Ok(Registry::default().with(format_layer(config)).with(filter))
}

fn format_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_span_events(config.span_events.clone());

    match config.output {
        TracingOutput::Compact => Box::new(layer.compact().with_ansi(config.ansi)),
        TracingOutput::Pretty => Box::new(layer.pretty().with_ansi(config.ansi)),
        TracingOutput::Json => Box::new(layer.json().with_ansi(false)),
    }
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Install a subscriber for tests; repeated calls are no-ops.
///
/// Uses [`TracingConfig::from_env`] so `WEBNN_TRACING_DIRECTIVES=trace` works
/// for a single `cargo test` run.
pub fn init_test_tracing() {
    let config = TracingConfig {
        ansi: false,
        output: TracingOutput::Compact,
        ..TracingConfig::from_env()
    };
    let _ = init_global_tracing(&config);
}
