//! Process-wide runtime facts.
//!
//! [`ProcessConfig`] answers two questions every component eventually asks:
//! "am I running in production?" and "what is my hostname?". It is built once
//! at startup and handed to components at construction time. Tests build their
//! own instances instead of mutating a shared global.
//!
//! # Example
//!
//! ```
//! use micro_server_config::ProcessConfig;
//!
//! let process = ProcessConfig::new(false, "build-box");
//! assert!(!process.in_production());
//!
//! // Wildcard hosts resolve to localhost outside production.
//! assert_eq!(process.resolve_hostname("0.0.0.0:8080"), "localhost:8080");
//!
//! // In production they resolve to the machine hostname.
//! let process = ProcessConfig::new(true, "pod-7");
//! assert_eq!(process.resolve_hostname("[::]:8080"), "pod-7:8080");
//! ```

use std::net::IpAddr;
use std::sync::OnceLock;

use crate::ConfigError;

/// Environment variable whose presence marks the process as running in production.
///
/// Running inside Kubernetes is treated as "not on a developer machine".
pub const KUBERNETES_PORT_ENV: &str = "KUBERNETES_PORT";

/// Environment variable consulted first when looking up the hostname.
pub const HOSTNAME_ENV: &str = "HOSTNAME";

/// Fallback host used for local resolution and when no hostname is known.
pub const LOCALHOST: &str = "localhost";

const HOSTNAME_FILE: &str = "/etc/hostname";

static GLOBAL: OnceLock<ProcessConfig> = OnceLock::new();

/// Process-wide configuration shared by every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    in_production: bool,
    hostname: String,
}

impl ProcessConfig {
    /// Creates a configuration with explicit values.
    #[must_use]
    pub fn new(in_production: bool, hostname: impl Into<String>) -> Self {
        Self {
            in_production,
            hostname: hostname.into(),
        }
    }

    /// A developer-machine configuration using the detected hostname.
    #[must_use]
    pub fn development() -> Self {
        Self::new(false, detect_hostname(|key| std::env::var(key).ok()))
    }

    /// A production configuration using the detected hostname.
    #[must_use]
    pub fn production() -> Self {
        Self::new(true, detect_hostname(|key| std::env::var(key).ok()))
    }

    /// Builds the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// `KUBERNETES_PORT` set to a non-empty value means production.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let in_production = lookup(KUBERNETES_PORT_ENV).is_some_and(|value| !value.is_empty());
        Self::new(in_production, detect_hostname(lookup))
    }

    /// Installs the process-wide default.
    ///
    /// Must run before the first call to [`ProcessConfig::global`]; the value
    /// can only be set once.
    pub fn init_global(config: Self) -> Result<(), ConfigError> {
        GLOBAL.set(config).map_err(|_| {
            ConfigError::validation_error("process configuration is already initialized")
        })
    }

    /// Returns the process-wide default, reading the environment on first use.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::from_env)
    }

    /// Returns `true` when the process is not running on a developer machine.
    pub fn in_production(&self) -> bool {
        self.in_production
    }

    /// Returns the hostname of the current host.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Converts an endpoint into a hostname suitable for an HTTP request URI.
    ///
    /// When `use_local` is set, wildcard and unknown hosts resolve to
    /// `localhost`; otherwise they resolve to the machine hostname.
    pub fn endpoint_to_hostname(&self, endpoint: &str, use_local: bool) -> String {
        let default_host = if use_local { LOCALHOST } else { &self.hostname };
        endpoint_to_hostname(endpoint, default_host)
    }

    /// Resolves a bound address for display: local resolution outside
    /// production, machine hostname inside it.
    pub fn resolve_hostname(&self, endpoint: &str) -> String {
        self.endpoint_to_hostname(endpoint, !self.in_production)
    }
}

/// Converts `endpoint` into a hostname, substituting `default_host` for
/// wildcard or unparseable hosts.
///
/// - `host:port` keeps the port; an empty, `0.0.0.0` or `::` host is replaced.
/// - A bare, specified IP address is returned unchanged.
/// - Anything else yields `default_host`.
pub fn endpoint_to_hostname(endpoint: &str, default_host: &str) -> String {
    if let Some((host, port)) = split_host_port(endpoint) {
        let host = match host {
            "" | "0.0.0.0" | "::" => default_host.to_string(),
            other if other.contains(':') => format!("[{other}]"),
            other => other.to_string(),
        };
        return format!("{host}:{port}");
    }

    match endpoint.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() => ip.to_string(),
        _ => default_host.to_string(),
    }
}

/// Splits `host:port`, accepting bracketed IPv6 hosts.
fn split_host_port(endpoint: &str) -> Option<(&str, &str)> {
    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }

    let (host, port) = endpoint.rsplit_once(':')?;
    if host.contains(':') {
        // Unbracketed IPv6 literal, not a host:port pair.
        return None;
    }
    Some((host, port))
}

/// Hostname lookup order: `HOSTNAME`, then `/etc/hostname`, then `localhost`.
fn detect_hostname<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(HOSTNAME_ENV)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            std::fs::read_to_string(HOSTNAME_FILE)
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| LOCALHOST.to_string())
}
