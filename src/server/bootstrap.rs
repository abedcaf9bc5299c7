use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::server;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    /// Admin listener for metrics and the route listing. Disabled when `None`.
    pub admin_listen: Option<String>,
}

/// Gateway lifecycle: load → compile → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let _log_guards = init_tracing();

    let config = GatewayConfig::load(&args.config_path)?;
    let metrics = Metrics::install()?;
    let state = server::GatewayState::new(config)?;

    if !state.config.disable_display_route_on_start {
        state.log_routes();
    }

    let listener = TcpListener::bind(&state.config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", state.config.listen_addr))?;

    if let Some(addr) = &args.admin_listen {
        start_admin_server(&state, addr, metrics).await?;
    }

    tracing::info!("server: starting gateway, listen={}", state.config.listen_addr);

    let shutdown = Arc::new(Notify::new());
    let proxy_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(listener, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    match proxy_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("server: proxy failed, error={}", e),
        Err(e) => tracing::error!("server: proxy task error: {}", e),
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

/// JSON logs: INFO and more verbose to stdout, WARN and ERROR to stderr.
/// The returned guards flush the writers when dropped.
pub fn init_tracing() -> [WorkerGuard; 2] {
    let (stdout, stdout_guard) = NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());
    let (stderr, stderr_guard) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stderr());

    let writer = stderr
        .with_max_level(tracing::Level::WARN)
        .and(stdout.with_min_level(tracing::Level::INFO));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    [stdout_guard, stderr_guard]
}

async fn start_admin_server(
    state: &server::GatewayState,
    addr: &str,
    metrics: Metrics,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin listener {addr}"))?;
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(listener, state, Some(metrics)).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
    Ok(())
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("server: failed to listen for SIGINT, error={}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("server: failed to install SIGTERM handler, error={}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_one();
}
