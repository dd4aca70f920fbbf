use anyhow::{Context, Result};
use clap::Parser;
use facegate_core::{CosineMatcher, FaceAnalyzer, OnnxFaceAnalyzer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod enroll;
mod http;
mod monitor;
mod processor;
mod roster;
mod state;
mod store;
mod verifier;

#[cfg(test)]
mod testutil;

use config::Config;
use enroll::Enroller;
use processor::FrameProcessor;
use store::EmbeddingStore;
use verifier::{AuthorityClient, Verifier};

/// Face recognition gate: ingests camera frames, identifies enrolled
/// people and checks their eligibility with the authorization service.
#[derive(Parser, Debug)]
#[command(name = "facegated", version)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    bind: Option<String>,

    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Base URL of the authorization service.
    #[arg(long)]
    authority_url: Option<String>,

    /// Never call the authorization service.
    #[arg(long)]
    no_verification: bool,

    /// Do not run the frame monitor.
    #[arg(long)]
    no_monitor: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(dir) = self.model_dir {
            config.model_dir = dir;
        }
        if let Some(url) = self.authority_url {
            config.authority_url = url;
        }
        if self.no_verification {
            config.verification_enabled = false;
        }
        if self.no_monitor {
            config.monitor_enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    tracing::info!(
        bind = %config.bind,
        model_dir = %config.model_dir.display(),
        threshold = config.similarity_threshold,
        verification = config.verification_enabled,
        "facegated starting"
    );

    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind))?;

    let analyzer: Arc<dyn FaceAnalyzer> =
        Arc::new(OnnxFaceAnalyzer::load(&config.model_dir).context("cannot start without face models")?);
    let store = Arc::new(EmbeddingStore::new(analyzer.embedding_dim()));
    let enroller = Arc::new(Enroller::new(Arc::clone(&analyzer), Arc::clone(&store)));

    let authority = config.verification_enabled.then(|| {
        Arc::new(AuthorityClient::new(
            &config.authority_url,
            config.verify_timeout(),
            config.roster_timeout(),
        ))
    });
    if let Some(authority) = &authority {
        tracing::info!(url = authority.base_url(), "verification enabled");
    }

    roster::seed_store(
        authority.as_deref(),
        config.reference_image.as_deref(),
        &enroller,
    )
    .await;
    if store.is_empty() {
        tracing::warn!("no known faces loaded; every face will be reported as unknown");
    }

    let (publisher, reader) = state::recognition_state();
    let processor = FrameProcessor::new(
        Arc::clone(&analyzer),
        Arc::clone(&store),
        Box::new(CosineMatcher),
        authority.clone().map(|a| a as Arc<dyn Verifier>),
        config.similarity_threshold,
        publisher,
    );

    let monitor = config
        .monitor_enabled
        .then(|| monitor::spawn_monitor(reader.clone(), config.monitor_interval()));

    let app = http::router(
        http::AppState {
            processor: Arc::new(processor),
            enroller,
            store: Arc::clone(&store),
            reader,
            authority,
            model_name: analyzer.model_name().to_string(),
        },
        config.max_frame_bytes,
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    tracing::info!(
        %addr,
        known_faces = store.len(),
        embedding_dim = store.dim(),
        "facegated ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    tracing::info!("facegated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
