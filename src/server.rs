pub mod errors;
pub mod handlers;

use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::gateway::ConnectionManager;
use handlers::{health::health_check, readers, websocket::websocket_handler};

#[derive(Debug, Clone)]
pub struct ServerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub gateway: ConnectionManager,
}

pub struct Server {
    app: Router,
    listener: TcpListener,
}

impl Server {
    /// Builds the router and binds the listener.
    pub async fn new(gateway: ConnectionManager, config: ServerConfig<'_>) -> Result<Self> {
        let app = router(AppState { gateway });

        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .wrap_err_with(|| format!("Failed to bind to {addr}"))?;

        Ok(Self { app, listener })
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self
            .listener
            .local_addr()
            .wrap_err("Failed to read bound address")?
            .port())
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("Listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.app)
            .await
            .wrap_err("Failed to start server")
    }
}

pub fn router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
            let uri = request.uri().to_string();
            tracing::info_span!("request", method = %request.method(), uri)
        });

    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    let api = Router::new()
        .route("/websocket", get(websocket_handler))
        .route(
            "/readers/enroll-nfc-card",
            post(readers::enroll_nfc_card),
        )
        .route("/readers/reset-nfc-card", post(readers::reset_nfc_card))
        .route("/readers/{reader_id}/restart", post(readers::restart_reader));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/fabreader", api)
        .layer(cors_layer)
        .layer(trace_layer)
        .with_state(state)
}
