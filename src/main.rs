mod cli;
mod config;
mod file_server;
mod modifiers;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use sidecast_net::HttpOutputHandle;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Some(Command::FileServer { addr }) = &cli.command {
        return file_server::run(addr).await;
    }

    let object_store = build_object_store(&cli).await;

    let inputs = config::build_inputs(&cli, object_store).await?;
    let (outputs, http_handles) = config::build_outputs(&cli).await?;
    info!(inputs = inputs.len(), outputs = outputs.len(), "sidecast: pipeline assembled");

    let emitter = config::build_emitter(&cli, inputs, outputs)?;
    let stats = emitter.stats();

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    spawn_shutdown_signal(shutdown_tx.clone());
    if let Some(duration) = &cli.exit_after {
        spawn_exit_after(duration, shutdown_tx)?;
    }
    if cli.stats {
        spawn_stats_log(stats, http_handles);
    }

    emitter.run(shutdown_rx).await?;
    info!("sidecast: shut down");
    Ok(())
}

#[cfg(feature = "s3")]
async fn build_object_store(cli: &Cli) -> Option<Arc<dyn sidecast_io::ObjectStore>> {
    let needs_s3 = cli.input_file.iter().any(|p| p.starts_with("s3://"));
    if needs_s3 {
        Some(Arc::new(sidecast_io::object_store::S3ObjectStore::from_env().await) as Arc<dyn sidecast_io::ObjectStore>)
    } else {
        None
    }
}

#[cfg(not(feature = "s3"))]
async fn build_object_store(_cli: &Cli) -> Option<Arc<dyn sidecast_io::ObjectStore>> {
    None
}

/// `--debug` and `--verbose` are independent flags: `--debug` raises the
/// floor to `debug`, `--verbose` raises it to `trace`-ish verbosity, and
/// passing both takes the more verbose of the two rather than one
/// silently overriding the other.
fn init_tracing(cli: &Cli) {
    let default_level = match (cli.debug, cli.verbose) {
        (false, false) => "info",
        (true, false) => "debug",
        (false, true) => "trace",
        (true, true) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Ctrl-C triggers the same graceful shutdown path as `--exit-after`.
fn spawn_shutdown_signal(tx: mpsc::Sender<()>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(()).await;
        }
    });
}

fn spawn_exit_after(spec: &str, tx: mpsc::Sender<()>) -> anyhow::Result<()> {
    let duration: Duration = humantime::parse_duration(spec)?;
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let _ = tx.send(()).await;
    });
    Ok(())
}

const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// `--stats`: queue depth, active worker counts, and ingress/egress
/// rates on a fixed interval, via `tracing::info!` so the lines compose
/// with the rest of the logging pipeline rather than bypassing it.
fn spawn_stats_log(stats: Arc<sidecast_emitter::EmitterStats>, http_handles: Vec<HttpOutputHandle>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(STATS_INTERVAL);
        let mut last_ingress = stats.ingress();
        let mut last_egress = stats.egress();
        loop {
            tick.tick().await;
            let ingress = stats.ingress();
            let egress = stats.egress();
            let ingress_rate = (ingress - last_ingress) as f64 / STATS_INTERVAL.as_secs_f64();
            let egress_rate = (egress - last_egress) as f64 / STATS_INTERVAL.as_secs_f64();
            last_ingress = ingress;
            last_egress = egress;

            let active_workers: usize = http_handles.iter().map(HttpOutputHandle::active_workers).sum();
            let http_queue_depth: usize = http_handles.iter().map(HttpOutputHandle::queue_depth).sum();

            info!(
                queue_depth = stats.queue_depth(),
                http_queue_depth,
                active_workers,
                ingress_rate,
                egress_rate,
                "sidecast: stats"
            );
        }
    });
}
