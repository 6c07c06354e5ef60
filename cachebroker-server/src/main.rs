use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod commands;
mod config;

use cli::{Args, Mode};

/// Initialize tracing with two outputs:
/// 1. stderr, for interactive runs
/// 2. ~/.cachebroker/server.log, for persistence
fn initialize_tracing() -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "info,\
         cachebroker_server=debug,\
         cachebroker_engine=debug,\
         tower_http=info"
            .into()
    });

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let log_dir = PathBuf::from(home).join(".cachebroker");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::never(&log_dir, "server.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops file logging
    std::mem::forget(guard);

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    initialize_tracing()?;

    match args.mode {
        Mode::Serve { port } => commands::server::run(port).await,
        Mode::Provision {
            id,
            node_type,
            replicas,
            no_tls,
            parameters,
        } => commands::instance::run_provision(id, node_type, replicas, !no_tls, parameters).await,
        Mode::Deprovision { id, final_snapshot } => {
            commands::instance::run_deprovision(id, final_snapshot).await
        }
        Mode::Status {
            id,
            operation,
            previous_primary,
            output,
        } => commands::instance::run_status(id, operation, previous_primary, output).await,
        Mode::Bind { id, binding_id } => commands::instance::run_bind(id, binding_id).await,
        Mode::FailoverTest { id, interval } => {
            commands::instance::run_failover_test(id, interval).await
        }
    }
}
