use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidegate::config::{LogConfig, SlidegateConfig};
use slidegate::http::GatewayServer;

/// Rate-limited HTTP gateway backed by a shared Redis.
#[derive(Debug, Parser)]
#[command(name = "slidegate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "SLIDEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the Redis URL from the configuration
    #[arg(long)]
    redis_url: Option<String>,

    /// Override the HTTP listen address from the configuration
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SlidegateConfig::load(args.config.as_deref())?;
    if let Some(url) = args.redis_url {
        config.store.redis_url = url;
    }
    if let Some(addr) = args.listen {
        config.server.listen_addr = addr;
    }
    if args.json_logs {
        config.log.json = true;
    }

    init_tracing(&config.log);

    info!("Starting Slidegate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(listen_addr = %config.server.listen_addr, routes = config.routes.len(), "Configuration loaded");

    GatewayServer::from_config(&config)
        .await?
        .serve_with_shutdown(shutdown_requested())
        .await?;

    info!("Slidegate stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve on the first Ctrl+C or, on Unix, SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still can.
async fn shutdown_requested() {
    let interrupt = async {
        match signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = received, "Shutting down, draining in-flight requests");
}
