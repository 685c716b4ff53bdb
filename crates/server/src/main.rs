//! # Pagesmith Server
//!
//! Process entrypoint for the orchestrator: an axum HTTP surface plus the
//! events consumer, the submissions consumer, and the reaper, all sharing
//! one job index over one pipeline database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use pagesmith_core::config::OrchestratorConfig;
use pagesmith_core::controller::SUBMISSIONS_QUEUE;
use pagesmith_core::job::Brief;
use pagesmith_core::messages::Submission;
use pagesmith_core::store::{BlobStore, QueueClient};
use pagesmith_core::{events, intake, reaper};
use pagesmith_core::{JobIndex, Metrics, PipelineController, PipelineDb};

mod api;
mod rate_limit;

use api::{AppState, SharedState};
use rate_limit::RateLimiter;

/// How long background consumers get to drain on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pagesmith", about = "Landing-page pipeline orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the orchestrator: HTTP API plus queue consumers
    Serve {
        /// Listen port (overrides PAGESMITH_HTTP_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Enqueue a brief on the submissions queue
    Submit {
        #[arg(long)]
        product: String,
        #[arg(long)]
        audience: String,
        #[arg(long)]
        tone: Option<String>,
        /// Client-supplied job id (a UUID is minted otherwise)
        #[arg(long)]
        job_id: Option<String>,
    },
}

fn init_tracing() {
    let filter = std::env::var("PAGESMITH_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("pagesmith=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

async fn run_server(config: OrchestratorConfig, port_override: Option<u16>) -> Result<()> {
    let db = PipelineDb::open_at(&config.db_path)
        .with_context(|| format!("opening pipeline database at {}", config.db_path.display()))?;

    let index = Arc::new(JobIndex::new());
    let metrics = Arc::new(Metrics::new());
    let blobs = BlobStore::new(db.clone());
    let queue = QueueClient::new(db, config.visibility_timeout);
    let controller = Arc::new(PipelineController::new(
        Arc::clone(&index),
        blobs.clone(),
        queue.clone(),
        Arc::clone(&metrics),
        config.legacy_hyphen_keys,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = vec![
        tokio::spawn(events::run_events_consumer(
            queue.clone(),
            Arc::clone(&controller),
            Arc::clone(&metrics),
            shutdown_rx.clone(),
        )),
        tokio::spawn(intake::run_submission_intake(
            queue.clone(),
            blobs,
            Arc::clone(&controller),
            Arc::clone(&metrics),
            shutdown_rx.clone(),
        )),
        tokio::spawn(reaper::run_reaper(
            Arc::clone(&index),
            Arc::clone(&metrics),
            config.reap_interval,
            config.reap_ttl,
            config.stage_deadline,
            shutdown_rx,
        )),
    ];

    let state: SharedState = Arc::new(AppState {
        index,
        controller,
        metrics,
        limiter: RateLimiter::new(config.rate_limit_window),
    });

    let app = Router::new()
        .route("/jobs", post(api::submit_job).get(api::list_jobs))
        .route("/jobs/:id", get(api::get_job))
        .route("/tasks", get(api::list_tasks))
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics_text))
        .with_state(state);

    let port = port_override.unwrap_or(config.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "pagesmith orchestrator listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server error")?;

    // Signal the consumers and give them a bounded drain. Anything still
    // claimed on the queues redelivers after restart.
    info!("shutting down, draining consumers");
    let _ = shutdown_tx.send(true);
    for handle in consumers {
        if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
            error!("consumer did not drain in time");
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn run_submit(
    config: &OrchestratorConfig,
    product: String,
    audience: String,
    tone: Option<String>,
    job_id: Option<String>,
) -> Result<()> {
    let brief = Brief {
        product,
        audience,
        tone,
    };
    brief
        .validate()
        .map_err(|reason| anyhow::anyhow!(reason))?;

    let db = PipelineDb::open_at(&config.db_path)
        .with_context(|| format!("opening pipeline database at {}", config.db_path.display()))?;
    let queue = QueueClient::new(db, config.visibility_timeout);

    let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    queue
        .send(
            SUBMISSIONS_QUEUE,
            &Submission::Inline {
                job_id: Some(job_id.clone()),
                brief,
            },
        )
        .context("enqueueing submission")?;

    println!("submitted job {job_id}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = OrchestratorConfig::from_env()?;

    match args.command {
        Some(CliCommand::Submit {
            product,
            audience,
            tone,
            job_id,
        }) => run_submit(&config, product, audience, tone, job_id),
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, None).await,
    }
}
