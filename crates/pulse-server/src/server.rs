use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use pulse_core::events::Collection;
use pulse_store::chat::ChatRepo;
use pulse_store::transactions::TransactionRepo;
use pulse_store::{ChangeFeed, Database};

use crate::chat::{self, ChatService};
use crate::client::ClientRegistry;
use crate::dispatch::Dispatcher;
use crate::stream;
use crate::watcher::{self, ChangeSource};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9300,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub transactions: Arc<TransactionRepo>,
    pub chat: Arc<ChatService>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(stream::events_handler))
        .route(
            "/chat/{account_id}/messages",
            get(chat::history_handler).post(chat::send_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps the
/// background watchers alive.
pub async fn start(
    config: ServerConfig,
    db: Database,
    feed: Arc<ChangeFeed>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));

    let transactions = Arc::new(TransactionRepo::new(db.clone(), Arc::clone(&feed)));
    let chat = Arc::new(ChatService::new(
        ChatRepo::new(db, Arc::clone(&feed)),
        Arc::clone(&dispatcher),
    ));

    // One capture loop per watched collection
    let source: Arc<dyn ChangeSource> = feed;
    let watchers = vec![
        watcher::spawn_watcher(
            Arc::clone(&source),
            Arc::clone(&dispatcher),
            Collection::Accounts,
        ),
        watcher::spawn_watcher(
            Arc::clone(&source),
            Arc::clone(&dispatcher),
            Collection::Transactions,
        ),
    ];

    let state = AppState {
        registry,
        dispatcher,
        transactions,
        chat,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "pulse server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _watchers: watchers,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _watchers: Vec<tokio::task::JoinHandle<()>>,
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "clients": state.registry.count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, Arc<ChangeFeed>) {
        let db = Database::in_memory().unwrap();
        let feed = Arc::new(ChangeFeed::new(32));
        (db, feed)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (db, feed) = setup();

        let config = ServerConfig {
            port: 0, // Random port
            ..Default::default()
        };

        let handle = start(config, db, feed).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["clients"], 0);
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let (db, feed) = setup();
        let registry = Arc::new(ClientRegistry::new(32));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));
        let state = AppState {
            registry,
            dispatcher: Arc::clone(&dispatcher),
            transactions: Arc::new(TransactionRepo::new(db.clone(), Arc::clone(&feed))),
            chat: Arc::new(ChatService::new(ChatRepo::new(db, feed), dispatcher)),
        };

        let _router = build_router(state);
        // If this doesn't panic, the router was built successfully
    }
}
