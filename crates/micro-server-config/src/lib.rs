//! Configuration for micro-server processes.
//!
//! Two concerns live here:
//!
//! - [`ProcessConfig`]: process-wide facts (production flag, hostname) and
//!   endpoint-to-hostname resolution. Built once at startup and injected.
//! - [`ConfigLoader`]: layered loading of [`ServerSettings`]
//!   (defaults → TOML/JSON file → `PREFIX__SECTION__KEY` environment).
//!
//! # Example
//!
//! ```no_run
//! use micro_server_config::{ConfigLoader, ProcessConfig};
//!
//! # fn main() -> Result<(), micro_server_config::ConfigError> {
//! let process = ProcessConfig::from_env();
//!
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_optional_file("micro-server.toml")?
//!     .with_env_prefix("MICRO_SERVER")
//!     .load()?;
//!
//! println!(
//!     "listening on {}",
//!     process.resolve_hostname(&config.server.endpoint)
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `MICRO_SERVER__SERVER__ENDPOINT=:9000`
//! - `MICRO_SERVER__SERVER__GRACEFUL_TIMEOUT_MS=2000`
//! - `MICRO_SERVER__SERVER__ENABLE_TRACING=true`

#![warn(missing_docs)]

mod error;
mod loader;
mod production;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use production::{
    endpoint_to_hostname, ProcessConfig, HOSTNAME_ENV, KUBERNETES_PORT_ENV, LOCALHOST,
};
pub use schema::{MicroServerConfig, ServerSettings, DEFAULT_GRACEFUL_TIMEOUT};
