//! itk-api - InfiniteTalk orchestration service
//!
//! Accepts generation requests over HTTP, drives the node-graph rendering
//! backend, and hands back the produced video synchronously (`/infer`) or
//! through background jobs (`/run`, `/status`, `/download`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use itk_common::config::TomlConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use itk_api::services::{
    ComfyClient, InMemoryJobStore, JobExecutor, LocalAudioTools, LocalMediaResolver,
    OutputMaterializer, Pipeline, TemplateCatalog,
};
use itk_api::AppState;

/// Command-line arguments for itk-api
#[derive(Parser, Debug)]
#[command(name = "itk-api")]
#[command(about = "InfiniteTalk video generation orchestration service")]
#[command(version)]
struct Args {
    /// Config file (must exist when given)
    #[arg(short, long, env = "ITK_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Rendering backend host
    #[arg(long)]
    backend_address: Option<String>,

    /// Rendering backend port
    #[arg(long)]
    backend_port: Option<u16>,

    /// Directory holding the workflow templates
    #[arg(long)]
    templates_dir: Option<PathBuf>,
}

impl Args {
    fn apply_to(&self, config: &mut TomlConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(address) = &self.backend_address {
            config.backend.address = address.clone();
        }
        if let Some(port) = self.backend_port {
            config.backend.port = port;
        }
        if let Some(dir) = &self.templates_dir {
            config.paths.templates_dir = dir.clone();
        }
    }
}

/// Resolve configuration: CLI > environment > TOML > defaults
///
/// The logging section is not known until this finishes, so loading runs
/// under a scoped stderr subscriber writing to `make_writer`.
fn load_config<F, W>(args: &Args, lookup: F, make_writer: W) -> Result<TomlConfig>
where
    F: Fn(&str) -> Option<String>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();

    tracing::subscriber::with_default(bootstrap, || {
        let mut config = TomlConfig::load(args.config.as_deref())?;
        config.apply_overrides_from(lookup);
        args.apply_to(&mut config);
        Ok::<_, itk_common::Error>(config)
    })
    .context("Failed to load configuration")
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("itk_api={0},itk_common={0},tower_http=info", config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args, |key| std::env::var(key).ok(), std::io::stderr)?;
    init_tracing(&config)?;

    info!("Starting itk-api (InfiniteTalk orchestration)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", config.backend.base_url());
    info!("Templates: {}", config.paths.templates_dir.display());

    // Identifies this process on the backend event stream
    let client_id = itk_common::uuid_utils::generate().to_string();
    info!(client_id = %client_id, "Backend client id");

    let backend = ComfyClient::new(config.backend.clone(), client_id)
        .context("Failed to create backend client")?;
    let resolver = LocalMediaResolver::new(config.paths.work_dir.clone())
        .context("Failed to create media resolver")?;

    let templates = TemplateCatalog::load(&config.paths.templates_dir);
    let drift = templates.drift();
    if !drift.is_empty() {
        warn!(variants = drift.len(), "Workflow templates drifted from the slot table");
    }

    let pipeline = Arc::new(Pipeline {
        resolver: Arc::new(resolver),
        audio: Arc::new(LocalAudioTools::new()),
        templates: Arc::new(templates),
        backend: Arc::new(backend),
        materializer: Arc::new(OutputMaterializer::new(config.paths.network_volume_dir.clone())),
        paths: config.paths.clone(),
    });
    let executor = JobExecutor::new(Arc::new(InMemoryJobStore::new()), pipeline);
    let _sweeper = executor.spawn_retention_sweeper(config.jobs.clone());

    let app = itk_api::build_router(AppState::new(executor));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
