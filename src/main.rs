//! Codections Back binary entrypoint wiring REST, WebSocket, SSE and the quiz store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codections_back::{
    config::AppConfig,
    dao::{
        quiz_store::{QuizStore, memory::MemoryQuizStore},
        storage::StorageError,
    },
    routes,
    services::{session_scheduler, sse_events, storage_supervisor},
    state::{AppState, SharedState},
};

/// Which store backend the process runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreBackend {
    Memory,
    #[cfg(feature = "mongo-store")]
    Mongo,
}

impl StoreBackend {
    fn from_env() -> anyhow::Result<Self> {
        let raw = env::var("STORE_BACKEND").unwrap_or_else(|_| Self::default_name().into());
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Ok(Self::Mongo),
            other => bail!("unsupported STORE_BACKEND `{other}`"),
        }
    }

    fn default_name() -> &'static str {
        if cfg!(feature = "mongo-store") {
            "mongo"
        } else {
            "memory"
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = StoreBackend::from_env()?;
    let app_state = AppState::new(config);

    spawn_store_supervisor(app_state.clone(), backend);
    tokio::spawn(sse_events::run(app_state.clone()));
    tokio::spawn(session_scheduler::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, ?backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Run the storage supervisor for the selected backend. The server starts in
/// degraded mode and leaves it once the first connection succeeds.
fn spawn_store_supervisor(state: SharedState, backend: StoreBackend) {
    match backend {
        StoreBackend::Memory => {
            let store = MemoryQuizStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store: Arc<dyn QuizStore> = Arc::new(store.clone());
                async move { Ok::<_, StorageError>(store) }
            }));
        }
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use codections_back::dao::quiz_store::mongodb::{MongoConfig, MongoQuizStore};

            let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
            let db_name = env::var("MONGO_DB").ok();
            tokio::spawn(storage_supervisor::run(state, move || {
                let uri = uri.clone();
                let db_name = db_name.clone();
                async move {
                    let config = MongoConfig::from_uri(&uri, db_name.as_deref()).await?;
                    let store = MongoQuizStore::connect(config).await?;
                    Ok::<Arc<dyn QuizStore>, StorageError>(Arc::new(store))
                }
            }));
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
