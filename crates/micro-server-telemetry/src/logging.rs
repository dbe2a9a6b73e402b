//! Process logging.
//!
//! Two presets, picked from the process configuration:
//!
//! - development: human-readable console output at `debug`.
//! - production: JSON output at `info`, with a per-callsite sampler so a hot
//!   log line cannot flood the output.
//!
//! The `USGO_LOG_LEVEL` environment variable overrides the preset level. It
//! accepts `debug`, `info`, `warning` or `error`, or an integer verbosity
//! where larger numbers are noisier (`1` is debug, `0` info, `-1` warn).
//!
//! Every emitted event also increments `micro_server_logs_total`.
//!
//! # Example
//!
//! ```rust,ignore
//! use micro_server_config::ProcessConfig;
//! use micro_server_telemetry::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::for_process(&ProcessConfig::from_env()).with_env_override();
//! init_logging(&config)?;
//!
//! tracing::info!(endpoint = ":8080", "Starting the HTTP server");
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use micro_server_config::ProcessConfig;
use parking_lot::Mutex;
use tracing::callsite::Identifier;
use tracing::level_filters::LevelFilter;
use tracing::subscriber::Interest;
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Filter, Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Environment variable overriding the log level.
pub const LOG_LEVEL_ENV: &str = "USGO_LOG_LEVEL";

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line human-readable output.
    Console,
    /// One JSON object per line.
    Json,
}

/// Per-callsite sampling window.
///
/// Within each `tick`, the first `first` events from a callsite pass; after
/// that only every `thereafter`-th event does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Window length.
    pub tick: Duration,
    /// Events always logged per window.
    pub first: u64,
    /// Sampling interval once `first` is exceeded. Zero drops the rest.
    pub thereafter: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            first: 100,
            thereafter: 100,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Most verbose level emitted.
    pub level: LevelFilter,

    /// Extra `EnvFilter` directives, e.g. `hyper=info`.
    pub directives: String,

    /// Output encoding.
    pub format: LogFormat,

    /// Whether each line carries a timestamp.
    pub with_time: bool,

    /// Whether to include the event target.
    pub include_target: bool,

    /// Sampling applied to the output layer. `None` logs everything.
    pub sampling: Option<SamplingConfig>,

    /// Whether to count events into `micro_server_logs_total`.
    pub count_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Console output at `debug`, no sampling.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: LevelFilter::DEBUG,
            directives: String::new(),
            format: LogFormat::Console,
            with_time: true,
            include_target: true,
            sampling: None,
            count_events: true,
        }
    }

    /// JSON output at `info`, sampled.
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: LevelFilter::INFO,
            directives: String::new(),
            format: LogFormat::Json,
            with_time: true,
            include_target: true,
            sampling: Some(SamplingConfig::default()),
            count_events: true,
        }
    }

    /// Picks the preset matching the process.
    #[must_use]
    pub fn for_process(process: &ProcessConfig) -> Self {
        if process.in_production() {
            Self::production()
        } else {
            Self::development()
        }
    }

    /// Applies `USGO_LOG_LEVEL` from the process environment.
    #[must_use]
    pub fn with_env_override(self) -> Self {
        self.with_level_from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies `USGO_LOG_LEVEL` from an arbitrary lookup. Unparseable values
    /// keep the current level.
    #[must_use]
    pub fn with_level_from_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(LOG_LEVEL_ENV).as_deref().and_then(parse_level) {
            self.level = level;
        }
        self
    }

    /// Drops timestamps from every line.
    #[must_use]
    pub fn without_time(mut self) -> Self {
        self.with_time = false;
        self
    }

    /// Sets the level.
    #[must_use]
    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Sets extra filter directives.
    #[must_use]
    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = directives.into();
        self
    }
}

/// Parses a `USGO_LOG_LEVEL` value.
///
/// Named levels are case-insensitive. Integers are clamped to the `i8`
/// range: `>= 2` trace, `1` debug, `0` info, `-1` warn, `<= -2` error.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "debug" => return Some(LevelFilter::DEBUG),
        "info" => return Some(LevelFilter::INFO),
        "warning" => return Some(LevelFilter::WARN),
        "error" => return Some(LevelFilter::ERROR),
        _ => {}
    }

    let verbosity: i64 = value.parse().ok()?;
    let verbosity = verbosity.clamp(i64::from(i8::MIN), i64::from(i8::MAX));
    Some(match verbosity {
        v if v >= 2 => LevelFilter::TRACE,
        1 => LevelFilter::DEBUG,
        0 => LevelFilter::INFO,
        -1 => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if a global subscriber is already
/// set. Never panics.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .parse(&config.directives)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log directives: {e}")))?;

    let output: Box<dyn Layer<Base> + Send + Sync> = output_layer(config);
    let output = output.with_filter(Sampler::new(config.sampling));
    let counter = config.count_events.then_some(LogCountLayer);

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .with(counter)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

type Base = Layered<EnvFilter, Registry>;

fn output_layer<S>(config: &LogConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer().with_target(config.include_target);
    match (config.format, config.with_time) {
        (LogFormat::Json, true) => layer.json().boxed(),
        (LogFormat::Json, false) => layer.json().without_time().boxed(),
        (LogFormat::Console, true) => layer.boxed(),
        (LogFormat::Console, false) => layer.without_time().boxed(),
    }
}

/// Per-callsite log sampler used as a layer filter.
#[derive(Debug)]
pub struct Sampler {
    config: Option<SamplingConfig>,
    windows: Mutex<HashMap<Identifier, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    seen: u64,
}

impl Window {
    fn admit(&mut self, now: Instant, config: &SamplingConfig) -> bool {
        if now.saturating_duration_since(self.started) >= config.tick {
            self.started = now;
            self.seen = 0;
        }
        self.seen += 1;

        if self.seen <= config.first {
            return true;
        }
        config.thereafter > 0 && (self.seen - config.first) % config.thereafter == 0
    }
}

impl Sampler {
    /// Creates a sampler. `None` admits every event.
    #[must_use]
    pub fn new(config: Option<SamplingConfig>) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> Filter<S> for Sampler {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        let Some(config) = self.config else {
            return true;
        };
        if !meta.is_event() {
            return true;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows
            .entry(meta.callsite())
            .or_insert(Window {
                started: now,
                seen: 0,
            })
            .admit(now, &config)
    }

    fn callsite_enabled(&self, _meta: &'static Metadata<'static>) -> Interest {
        // Sampling is stateful, so every event has to be asked about.
        Interest::sometimes()
    }
}

/// Layer counting every event into `micro_server_logs_total`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCountLayer;

impl<S: Subscriber> Layer<S> for LogCountLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        crate::metrics::record_log(meta.target(), *meta.level());
    }
}

/// Lowercase label for a level.
pub(crate) fn level_label(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}
