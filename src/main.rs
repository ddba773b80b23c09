use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::gateway::{GatewayServer, ProxyUpstream, RateLimitGuard};
use gatekeeper::ratelimit::{Reaper, RateLimiter};

/// Rate limiting front for the membership portal API.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Address to listen on (overrides configuration)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Upstream portal `host:port` (overrides configuration)
    #[arg(long)]
    upstream: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upstream) = args.upstream {
        config.server.upstream = upstream;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        upstream = %config.server.upstream,
        "Configuration loaded"
    );

    // Fail fast on any policy or route misconfiguration.
    let rate_limiting = &config.rate_limiting;
    let policies = Arc::new(rate_limiting.build_policies()?);
    let routes = Arc::new(rate_limiting.build_routes(&policies)?);
    let resolver = rate_limiting.build_resolver()?;
    for name in policies.names() {
        if let Some(policy) = policies.get(name) {
            info!(
                policy = %policy.name,
                window_secs = policy.window.as_secs_f64(),
                max_requests = policy.max_requests,
                "Rate limit policy active"
            );
        }
    }

    let rate_limiter = Arc::new(RateLimiter::new());
    let reaper = Reaper::spawn(rate_limiter.store().clone(), rate_limiting.reaper_interval());

    let guard = RateLimitGuard::new(rate_limiter, policies, routes, resolver)?
        .with_success_headers(rate_limiting.emit_headers_on_success);
    let upstream = ProxyUpstream::new(config.server.upstream.clone())?;

    let server = GatewayServer::new(
        config.server.listen_addr,
        Arc::new(guard),
        Arc::new(upstream),
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    reaper.shutdown().await;
    info!("Gatekeeper stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
