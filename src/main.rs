//! wg-provisioner main entry point
//!
//! Handles CLI parsing, logging setup and wiring of the long-running
//! service: resource synchronizer, control socket and HTTP endpoint.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::signal;
use tokio::sync::watch;
use wg_provisioner::{
    config::{Backend, Config},
    control::{send_request, ApiRequest, CommandHandler, ControlAction, ControlServer},
    directory::HttpDirectory,
    monitoring::{check_health, export_prometheus},
    service::ServiceNotifier,
    system::Capabilities,
    Provisioner, APP_NAME, VERSION,
};

/// WireGuard provisioning service for directory-managed router fleets
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/wg-provisioner/config.toml"
    )]
    config: String,

    /// Control socket path, overriding the configuration
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the provisioning service
    Start,

    /// Query status of a running service
    Status,

    /// Trigger a resource synchronization on a running service
    Sync,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Start => {
            info!("Starting {} v{} with config: {}", APP_NAME, VERSION, cli.config);
            let mut config = Config::from_file(&cli.config)?;
            if let Some(socket) = cli.socket {
                config.control.socket_path = socket;
            }
            start(config).await
        }
        Commands::Status => query(&cli, ControlAction::Status).await,
        Commands::Sync => query(&cli, ControlAction::Sync).await,
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}

/// Send one control request to a running service and print the answer
async fn query(cli: &Cli, action: ControlAction) -> anyhow::Result<()> {
    let socket_path = match &cli.socket {
        Some(path) => path.clone(),
        None => Config::from_file(&cli.config)?.control.socket_path,
    };

    let response = send_request(&socket_path, &ApiRequest::new("cli", action)).await?;
    if let Some(err) = response.error {
        anyhow::bail!("{:?} failed: {}", action, err);
    }
    let data = response.data.unwrap_or(serde_json::Value::Null);
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

/// Run the service until a shutdown signal arrives
async fn start(config: Config) -> anyhow::Result<()> {
    let capabilities = match config.backend {
        Backend::System => {
            Capabilities::linux(config.command_timeout(), config.wireguard.key_backend)
        }
        Backend::Memory => Capabilities::memory(),
    };
    info!("System backend: {:?}", config.backend);

    let directory = HttpDirectory::new(
        &config.directory.url,
        Duration::from_secs(config.directory.timeout_secs),
    )?;
    let provisioner = Arc::new(Provisioner::new(&config, Arc::new(directory), capabilities)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_task = tokio::spawn(
        provisioner
            .synchronizer()
            .clone()
            .run(shutdown_rx.clone()),
    );

    let control = Arc::new(ControlServer::new(
        config.control.socket_path.clone(),
        Arc::new(CommandHandler::new(provisioner.clone())),
    ));
    let control_listener = control.bind()?;
    let control_task = {
        let control = control.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { control.serve(control_listener, shutdown).await })
    };

    let app = create_http_server(provisioner.clone());
    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
    info!("HTTP server listening on {}", config.http.bind);
    let http_task = {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let stopped = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await
            {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let notifier = ServiceNotifier::from_env();
    notifier.ready();
    info!(instance = %config.instance_id, "Service started");

    shutdown_signal().await;

    info!("Shutting down");
    notifier.stopping();
    let drain = Duration::from_secs(config.control.drain_timeout_secs);
    if !provisioner.shutdown(drain).await {
        warn!("Proceeding with shutdown while requests are still running");
    }

    let _ = shutdown_tx.send(true);
    for (name, task) in [
        ("synchronizer", sync_task),
        ("control server", control_task),
        ("http server", http_task),
    ] {
        if let Err(e) = task.await {
            error!("{} task failed: {}", name, e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Create HTTP server with routes
fn create_http_server(provisioner: Arc<Provisioner>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(provisioner)
}

/// Health check endpoint
async fn healthz(State(provisioner): State<Arc<Provisioner>>) -> Response {
    match provisioner.get_status().await {
        Ok(status) => {
            let check = check_health(&status);
            let code = if check.is_serving() {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (code, Json(check)).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Metrics endpoint (Prometheus format)
async fn metrics(State(provisioner): State<Arc<Provisioner>>) -> Response {
    match provisioner.get_status().await {
        Ok(status) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            export_prometheus(&status, VERSION),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
