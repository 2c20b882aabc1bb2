// Copyright (c) 2026 Isprava Engineering
//! agentrelay HTTP entrypoint: loads configuration, wires every
//! application service to its PostgreSQL/Anthropic/MCP adapter, and
//! serves the Axum router until asked to shut down.

use std::net::SocketAddr;
use std::sync::Arc;

use agentrelay_core::application::acl_service::AclService;
use agentrelay_core::application::admin_acl_service::AdminAclService;
use agentrelay_core::application::agent_loop::AgentLoopService;
use agentrelay_core::application::auth_service::AuthService;
use agentrelay_core::application::rate_limiter::RateLimiter;
use agentrelay_core::application::session_service::SessionService;
use agentrelay_core::config::Settings;
use agentrelay_core::domain::acl::AclConfigStore;
use agentrelay_core::domain::cache::SharedCache;
use agentrelay_core::domain::llm::LlmProvider;
use agentrelay_core::domain::mcp::McpBridge;
use agentrelay_core::domain::session::SessionStore;
use agentrelay_core::domain::user::UserRepository;
use agentrelay_core::infrastructure::acl_seed;
use agentrelay_core::infrastructure::circuit_breaker::BreakerRegistry;
use agentrelay_core::infrastructure::db::Database;
use agentrelay_core::infrastructure::llm::AnthropicProvider;
use agentrelay_core::infrastructure::mcp_bridge::{parse_server_configs, McpHttpBridge};
use agentrelay_core::infrastructure::repositories::{
    PostgresAclConfigStore, PostgresSessionStore, PostgresUserRepository,
};
use agentrelay_core::infrastructure::shared_cache::{FallbackCache, InMemoryCache, PostgresCache};
use agentrelay_core::presentation::api::{router, AppState};
use axum::http::HeaderName;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use agentrelay::startup::{init_tracing, shutdown_signal, CANONICAL_LOCATIONS};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("agentrelay: fatal startup error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env().map_err(|e| anyhow::anyhow!(e))?;
    init_tracing(settings.debug);

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;

    let db = Database::connect(&settings.database_url).await?;
    let pool = db.pool().clone();

    let breakers = Arc::new(BreakerRegistry::new());

    let postgres_cache: Arc<dyn SharedCache> = Arc::new(PostgresCache::new(pool.clone()));
    let fallback = Arc::new(InMemoryCache::new());
    let cache: Arc<dyn SharedCache> = Arc::new(FallbackCache::new(postgres_cache, fallback));

    let users: Arc<dyn UserRepository> =
        Arc::new(PostgresUserRepository::new(pool.clone(), breakers.database()));
    let sessions_store: Arc<dyn SessionStore> =
        Arc::new(PostgresSessionStore::new(pool.clone(), breakers.database()));

    let acl_store = Arc::new(PostgresAclConfigStore::new(pool.clone(), breakers.database()));
    let seed = acl_seed::load_seed(&settings.acl_seed_path)?;
    acl_store.seed_if_empty(seed).await?;
    let acl_store: Arc<dyn AclConfigStore> = acl_store;

    let server_configs = parse_server_configs(&settings.mcp_servers);
    let bridge: Arc<dyn McpBridge> = Arc::new(
        McpHttpBridge::connect(server_configs, Arc::clone(&breakers), Arc::clone(&cache)).await?,
    );

    let llm: Arc<dyn LlmProvider> =
        Arc::new(AnthropicProvider::new(settings.anthropic_api_key.clone(), settings.anthropic_model.clone()));

    let acl_service =
        Arc::new(AclService::new(Arc::clone(&acl_store), Arc::clone(&users), Arc::clone(&cache)));
    let admin_acl_service =
        Arc::new(AdminAclService::new(acl_store, Arc::clone(&cache), Arc::clone(&bridge)));
    let auth_service = Arc::new(AuthService::new(Arc::clone(&users)));
    let session_service = Arc::new(SessionService::new(Arc::clone(&sessions_store)));
    let rate_limiter = Arc::new(RateLimiter::new());

    let agent_loop = Arc::new(AgentLoopService::new(
        sessions_store,
        llm,
        Arc::clone(&bridge),
        Arc::clone(&acl_service),
        Arc::clone(&cache),
        breakers.claude_api(),
        CANONICAL_LOCATIONS.iter().map(|s| s.to_string()).collect(),
    ));

    let state = AppState {
        auth: auth_service,
        sessions: session_service,
        agent_loop,
        acl: acl_service,
        admin_acl: admin_acl_service,
        rate_limiter,
        breakers: Arc::clone(&breakers),
        bridge,
    };

    let request_id_header = HeaderName::from_static("x-request-id");

    let app = router(state)
        .route(
            "/metrics",
            axum::routing::get(move || {
                let handle = prometheus.clone();
                async move { handle.render() }
            }),
        )
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    tracing::info!(%addr, "agentrelay listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
