use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

mod audit_sink;
mod auth_ctx;
mod error;
mod http;
mod metrics;
mod state;

use state::AppState;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const TOOL_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flux_gateway=info,tower_http=debug".into()),
        )
        .init();

    // explicit path > FLUX_CONFIG env > defaults
    let config_path = std::env::var("FLUX_CONFIG").ok();
    let config = flux_core::config::FluxConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        flux_core::config::FluxConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let scheduler_db = config.database.scheduler_db();

    let state = Arc::new(AppState::new(config)?);

    spawn_scheduler(state.clone(), scheduler_db);
    spawn_tool_reloader(state.clone());
    spawn_retention_sweeper(state.clone());

    let router = http::build_router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("flux gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Runs the scheduler's minute-tick loop on its own connection to the same
/// database `AppState`'s `SchedulerHandle` uses, and drains fired jobs into
/// the engine/tool registry they describe.
///
/// The shutdown receiver subscribes off `AppState::shutdown_tx`, which lives
/// for the process's lifetime — a receiver paired with a sender dropped
/// immediately after this function returns would see `.changed()` resolve
/// with `Err` forever, starving the `interval.tick()` branch of `run()`'s
/// `select!` loop.
fn spawn_scheduler(state: Arc<AppState>, scheduler_db: std::path::PathBuf) {
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel(64);
    let shutdown_rx = state.shutdown_tx.subscribe();

    tokio::spawn(async move {
        let conn = match rusqlite::Connection::open(&scheduler_db) {
            Ok(c) => c,
            Err(e) => {
                warn!("scheduler engine failed to open its database: {e}");
                return;
            }
        };
        match flux_scheduler::SchedulerEngine::new(conn, Some(fired_tx)) {
            Ok(engine) => engine.run(shutdown_rx).await,
            Err(e) => warn!("scheduler engine failed to start: {e}"),
        }
    });

    tokio::spawn(async move {
        while let Some(job) = fired_rx.recv().await {
            run_job(&state, job).await;
        }
    });
}

async fn run_job(state: &AppState, job: flux_scheduler::Job) {
    let task = job.task;
    match task.action.as_str() {
        "send_message" => {
            let Some(message) = task.content else {
                warn!(job_id = %job.id, "send_message job with no content, skipping");
                return;
            };
            let mut messages = vec![flux_llm::Message::text(flux_llm::Role::User, &message)];
            let result = state
                .engine
                .run_turn(&mut messages, "You are Flux, a self-extending assistant runtime.", &state.config.provider.model, "scheduler", &Default::default())
                .await;
            if let Some(error) = result.error {
                warn!(job_id = %job.id, error, "scheduled send_message turn failed");
            }
        }
        "tool_call" => {
            let Some(tool_name) = task.tool_name else {
                warn!(job_id = %job.id, "tool_call job with no tool_name, skipping");
                return;
            };
            let inputs = task.tool_args.unwrap_or(serde_json::json!({}));
            match state.tools.invoke(&tool_name, inputs).await {
                Ok(result) if result.is_error => {
                    warn!(job_id = %job.id, tool = tool_name, content = %result.content, "scheduled tool call reported an error")
                }
                Err(e) => warn!(job_id = %job.id, tool = tool_name, error = %e, "scheduled tool call failed"),
                Ok(_) => info!(job_id = %job.id, tool = tool_name, "scheduled tool call completed"),
            }
        }
        other => warn!(job_id = %job.id, action = other, "unrecognized job action"),
    }
}

fn spawn_tool_reloader(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOOL_RELOAD_INTERVAL);
        loop {
            interval.tick().await;
            let failures = state.tools.reload_if_changed().await;
            for (name, reason) in failures {
                warn!(tool = name, reason, "tool failed to reload");
            }
        }
    });
}

fn spawn_retention_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            for manager in &state.retention_managers {
                match manager.run_cleanup() {
                    Ok(reports) => {
                        for report in reports {
                            if report.deleted_by_age > 0 || report.deleted_by_count > 0 {
                                info!(
                                    category = ?report.category,
                                    deleted_by_age = report.deleted_by_age,
                                    deleted_by_count = report.deleted_by_count,
                                    "retention sweep removed rows"
                                );
                            }
                        }
                    }
                    Err(e) => warn!("retention sweep failed: {e}"),
                }
            }
        }
    });
}
