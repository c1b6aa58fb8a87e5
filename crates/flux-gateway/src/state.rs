use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use flux_auth::{AuthMiddleware, JwtManager, RateLimiter, UserStore};
use flux_audit::AuditLog;
use flux_core::config::FluxConfig;
use flux_cost::{CostTracker, UsageStore};
use flux_engine::ConversationEngine;
use flux_llm::{HttpProvider, LlmProvider, MockProvider};
use flux_scheduler::SchedulerHandle;
use flux_storage::{ConversationBackend, KnowledgeBase, RetentionCategory, RetentionManager, RetentionPolicy};
use flux_tools::{Marketplace, ToolRegistry};
use flux_webhooks::{WebhookDispatcher, WebhookStore};

use crate::audit_sink::GatewayAuditSink;
use crate::metrics::Metrics;

/// Directory (relative to the process's working directory) tool source
/// files, approval state and marketplace metadata live under. Nothing
/// in `FluxConfig` models this layout yet, so it's hardcoded rather than
/// threaded through config for a feature with no knobs exposed yet.
const TOOLS_DIR: &str = "tools";

/// Everything every HTTP handler needs, aggregated the way
/// `skynet-gateway::AppState` aggregates its subsystems: config,
/// per-subsystem stores, and a couple of DashMap-backed in-memory maps
/// for request-scoped bookkeeping.
pub struct AppState {
    pub config: FluxConfig,
    pub engine: ConversationEngine,
    pub tools: Arc<ToolRegistry>,
    pub usage: Arc<UsageStore>,

    pub users: UserStore,
    pub jwt: Option<JwtManager>,
    pub rate_limiter: RateLimiter,
    pub auth: AuthMiddleware<GatewayAuditSink>,
    pub dashboard_token: Option<String>,

    pub conversations: ConversationBackend,
    pub knowledge: KnowledgeBase,
    pub retention_managers: Vec<RetentionManager>,

    pub audit: Arc<AuditLog>,
    pub webhooks: Arc<WebhookStore>,
    pub webhook_dispatcher: WebhookDispatcher,

    pub scheduler: SchedulerHandle,
    pub marketplace: Mutex<Marketplace>,

    pub active_operations: DashMap<String, CancellationToken>,
    pub metrics: Metrics,

    pub data_dir: PathBuf,
    pub backup_dest_dir: PathBuf,

    /// Kept alive for the lifetime of `AppState` so the scheduler's
    /// `watch::Receiver` never observes a closed channel. Dropping this
    /// would make every future `.changed()` poll resolve immediately,
    /// starving the scheduler's `interval.tick()` branch.
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: FluxConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.database.data_dir)?;
        std::fs::create_dir_all(TOOLS_DIR)?;
        std::fs::create_dir_all("knowledge")?;

        let provider = build_provider(&config);
        let tools = Arc::new(
            ToolRegistry::new(TOOLS_DIR, PathBuf::from(TOOLS_DIR).join("approvals.json"), false)
                .with_tool_timeout(config.engine.tool_timeout_seconds as f64),
        );
        let cost_tracker = Arc::new(CostTracker::with_default_pricing());
        let usage = Arc::new(UsageStore::load(config.database.usage_file()));
        let engine = ConversationEngine::new(
            provider,
            tools.clone(),
            cost_tracker,
            usage.clone(),
            None,
            config.engine.clone(),
        );

        let users = UserStore::open(config.database.auth_db())?;
        let jwt = config
            .gateway
            .auth
            .jwt_secret
            .as_deref()
            .map(JwtManager::new)
            .transpose()?;
        let rate_limiter = RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);
        let dashboard_token = std::env::var("FLUX_DASHBOARD_TOKEN").ok().filter(|t| !t.is_empty());

        let audit = Arc::new(AuditLog::open(config.database.audit_db())?);
        let auth = AuthMiddleware::new(users, GatewayAuditSink { log: audit.clone() });
        // `users` moved into `auth`; `auth.store()` is how handlers reach it.
        let users = UserStore::open(config.database.auth_db())?;

        let conversations = ConversationBackend::open(config.database.conversations_db())?;
        let knowledge = KnowledgeBase::new("knowledge")?;

        let retention_managers = vec![
            RetentionManager::new(
                flux_storage::db::open(config.database.conversations_db())?,
                vec![RetentionPolicy {
                    category: RetentionCategory::Conversations,
                    max_age_days: config.retention.conversations_max_age_days,
                    max_count: 0,
                }],
            ),
            RetentionManager::new(
                open_plain_sqlite(&config.database.audit_db())?,
                vec![RetentionPolicy {
                    category: RetentionCategory::AuditLogs,
                    max_age_days: config.retention.audit_logs_max_age_days,
                    max_count: 0,
                }],
            ),
            RetentionManager::new(
                open_plain_sqlite(&config.database.webhooks_db())?,
                vec![RetentionPolicy {
                    category: RetentionCategory::WebhookDeliveries,
                    max_age_days: config.retention.webhook_deliveries_max_age_days,
                    max_count: 0,
                }],
            ),
        ];

        let webhooks = Arc::new(WebhookStore::open(config.database.webhooks_db())?);
        let webhook_dispatcher = WebhookDispatcher::new(webhooks.clone());

        let scheduler_conn = rusqlite::Connection::open(config.database.scheduler_db())?;
        let scheduler = SchedulerHandle::new(scheduler_conn)?;

        let marketplace = Mutex::new(Marketplace::new(
            PathBuf::from(TOOLS_DIR).join("registry.json"),
            PathBuf::from(TOOLS_DIR).join("installed.json"),
            PathBuf::from(TOOLS_DIR).join(".cache"),
            TOOLS_DIR,
        ));

        let data_dir = config.database.data_dir.clone();
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Ok(Self {
            config,
            engine,
            tools,
            usage,
            users,
            jwt,
            rate_limiter,
            auth,
            dashboard_token,
            conversations,
            knowledge,
            retention_managers,
            audit,
            webhooks,
            webhook_dispatcher,
            scheduler,
            marketplace,
            active_operations: DashMap::new(),
            metrics: Metrics::new(),
            data_dir,
            backup_dest_dir: PathBuf::from("backups"),
            shutdown_tx,
        })
    }
}

fn build_provider(config: &FluxConfig) -> Arc<dyn LlmProvider> {
    match std::env::var(&config.provider.api_key_env) {
        Ok(key) if !key.is_empty() => Arc::new(HttpProvider::new(
            "primary",
            key,
            config.provider.base_url.clone(),
        )),
        _ => {
            tracing::warn!(
                env_var = %config.provider.api_key_env,
                "no provider API key configured, falling back to the mock provider"
            );
            Arc::new(MockProvider::default())
        }
    }
}

fn open_plain_sqlite(path: &std::path::Path) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}
