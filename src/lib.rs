pub mod appresult;
pub mod config;
pub mod hub;
pub mod protocol;
pub mod rooms;
pub mod upload;
pub mod users;

use std::sync::Arc;

use axum::{extract::FromRef, http::Method, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub use appresult::{AppError, AppResult};
use config::Config;
use hub::Hub;
use upload::UploadStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub uploads: Arc<UploadStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Self {
        let hub = Hub::new(config.relay()).await;
        Self {
            hub: Arc::new(hub),
            uploads: Arc::new(UploadStore::new(&config.uploads_dir)),
            config: Arc::new(config),
        }
    }
}

/// Every route: socket, discovery, uploads, and the static client.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .merge(rooms::router())
        .merge(upload::router(state.config.max_upload_bytes))
        .nest_service("/uploads", ServeDir::new(state.uploads.dir()))
        .fallback_service(ServeDir::new(&state.config.public_dir))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
