mod codec;
mod config;
mod handlers;
mod health;
mod metrics;
mod patch;
mod policy;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpBuilder;
use hyper_util::service::TowerToHyperService;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "android-x86-injector",
    about = "Mutating admission webhook that swaps the compute image of KubeVirt android launcher pods"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "/etc/injector/config.yaml", env = "INJECTOR_CONFIG")]
    config: String,
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for CTRL+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
                    _ = sigterm.recv() => info!("received SIGTERM, starting graceful shutdown"),
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                ctrl_c.await;
                info!("received CTRL+C, starting graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received CTRL+C, starting graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}

async fn run_webhook_server(
    listener: TcpListener,
    tls_acceptor: TlsAcceptor,
    router: Router,
    ready: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    ready.store(true, Ordering::Relaxed);

    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept TCP connection: {e}");
                        continue;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("webhook server shutting down");
                break;
            }
        };

        let tls_acceptor = tls_acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(%remote_addr, "TLS handshake failed: {e}");
                    return;
                }
            };

            let io = TokioIo::new(tls_stream);
            let service = TowerToHyperService::new(router.into_service());

            // Covers responses that could not be written back to the API server.
            if let Err(e) = HttpBuilder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(%remote_addr, "error serving connection: {e}");
            }
        });
    }
}

async fn run_health_server(
    listener: TcpListener,
    router: Router,
    mut shutdown_rx: watch::Receiver<()>,
) {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            info!("health server shutting down");
        })
        .await
        .unwrap_or_else(|e| error!("health server error: {e}"));
}

async fn bind(addr: &str, what: &str) -> TcpListener {
    let addr: SocketAddr = addr.parse().unwrap_or_else(|e| {
        eprintln!("Invalid {what} '{addr}': {e}");
        std::process::exit(1);
    });
    TcpListener::bind(addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind {what} {addr}: {e}");
        std::process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install default CryptoProvider");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let config = config::InjectorConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {e}", cli.config);
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        listen_addr = %config.listen_addr,
        metrics_addr = %config.metrics_addr,
        log_level = %config.log_level,
        injection.ignored_namespaces = ?config.injection.ignored_namespaces,
        injection.flavor = %format!("{}={}", config.injection.flavor_label, config.injection.flavor_value),
        injection.launcher = %format!("{}={}", config.injection.launcher_label, config.injection.launcher_value),
        injection.target_container = %config.injection.target_container,
        injection.image = %config.injection.image,
        "android-x86-injector starting"
    );

    let tls_config = tls::load_server_config(&config.tls_cert_path, &config.tls_key_path)
        .unwrap_or_else(|e| {
            eprintln!("Failed to load TLS config: {e}");
            std::process::exit(1);
        });
    let tls_acceptor = TlsAcceptor::from(tls_config);

    let mut registry = Registry::default();
    let injector_metrics = metrics::InjectorMetrics::new(&mut registry);

    let app_state = Arc::new(handlers::AppState {
        config: config.injection.clone(),
        codec: Box::new(codec::JsonCodec),
        metrics: injector_metrics,
    });
    let webhook_router = handlers::webhook_router(app_state);

    let ready = Arc::new(AtomicBool::new(false));
    let health_router = health::health_router(Arc::new(health::HealthState {
        registry: Arc::new(registry),
        ready: ready.clone(),
    }));

    let webhook_listener = bind(&config.listen_addr, "listen_addr").await;
    info!(addr = %config.listen_addr, "HTTPS webhook server listening");
    let health_listener = bind(&config.metrics_addr, "metrics_addr").await;
    info!(addr = %config.metrics_addr, "HTTP metrics/health server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let webhook_shutdown_rx = shutdown_rx.clone();
    let health_shutdown_rx = shutdown_rx;

    tokio::spawn(shutdown_signal(shutdown_tx));

    tokio::join!(
        run_webhook_server(
            webhook_listener,
            tls_acceptor,
            webhook_router,
            ready,
            webhook_shutdown_rx
        ),
        run_health_server(health_listener, health_router, health_shutdown_rx),
    );

    info!("android-x86-injector shut down gracefully");
}
