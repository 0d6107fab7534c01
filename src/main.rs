use std::sync::Arc;

use ractor::Actor;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use undertow::actors::event_log::{EventLogActor, EventLogArguments};
use undertow::actors::task_manager::{TaskManagerActor, TaskManagerArguments};
use undertow::actors::task_registry::{TaskRegistryActor, TaskRegistryArguments, TaskStore};
use undertow::api;
use undertow::app_state::AppState;
use undertow::config::Config;
use undertow::engine::scripted::ScriptedEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "undertow=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(port = config.port, "undertow starting");

    // Event log and task registry share the database file; each actor owns
    // its own connection.
    let (event_log, _event_log_handle) = Actor::spawn(
        None,
        EventLogActor,
        EventLogArguments::File(config.database_path.clone()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to spawn event log: {e}"))?;

    let (registry, _registry_handle) = Actor::spawn(
        None,
        TaskRegistryActor,
        TaskRegistryArguments {
            store: TaskStore::File(config.database_path.clone()),
            ttl_days: config.task_ttl_days,
            sweep_interval: std::time::Duration::from_secs(3600),
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to spawn task registry: {e}"))?;

    // The real research workflow plugs in behind the WorkflowEngine trait;
    // this build wires the scripted engine.
    let engine = Arc::new(ScriptedEngine::canned_research());

    let (manager, _manager_handle) = Actor::spawn(
        None,
        TaskManagerActor,
        TaskManagerArguments {
            registry: registry.clone(),
            event_log: event_log.clone(),
            engine,
            max_concurrent: config.max_concurrent_tasks,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to spawn task manager: {e}"))?;

    let state = AppState::new(manager, registry, event_log, config.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api::router()
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("listening on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
