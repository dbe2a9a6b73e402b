//! Sample service.
//!
//! Serves the health and metrics routes until SIGINT or SIGTERM.
//!
//! Settings come from `micro-server.toml` when present and from
//! `MICRO_SERVER__SERVER__*` environment variables, e.g.
//! `MICRO_SERVER__SERVER__ENDPOINT=:9000`.

use anyhow::Context;
use micro_server::prelude::*;

const APP_NAME: &str = "sample";
const CONFIG_FILE: &str = "micro-server.toml";
const ENV_PREFIX: &str = "MICRO_SERVER";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let process = ProcessConfig::from_env();
    ProcessConfig::init_global(process.clone())?;

    let telemetry = init_telemetry(TelemetryConfig::for_process(APP_NAME, &process))
        .context("failed to initialise telemetry")?;
    let metrics = MetricsExporter::install().context("failed to install metrics exporter")?;

    let mut defaults = MicroServerConfig::default();
    defaults.server.enable_profiling = true;
    let config = ConfigLoader::new()
        .with_defaults(defaults)
        .with_optional_file(CONFIG_FILE)?
        .with_dotenv()?
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    let readiness = ReadinessCheck::new();
    let server = Server::builder(config.server.endpoint.as_str())
        .options(ServerOptions::from(&config.server))
        .process(process)
        .service_name(APP_NAME)
        .monitoring(None, Some(readiness.boxed()), Some(metrics))
        .build()
        .context("failed to create server")?;

    let (cancel, release) = cancel_on_termination(&CancellationToken::new())?;
    let not_ready = {
        let readiness = readiness.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            readiness.set_ready(false);
        })
    };

    let result = server.run(&cancel).await;
    release.release().await;
    if let Err(e) = not_ready.await {
        tracing::debug!(error = %e, "readiness task ended abnormally");
    }

    drop(telemetry);
    result.context("server stopped with an error")
}
