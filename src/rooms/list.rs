use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};

use crate::{hub::Hub, rooms::ChannelSummary};

#[debug_handler(state = crate::AppState)]
pub async fn list_channels(State(hub): State<Arc<Hub>>) -> Json<Vec<ChannelSummary>> {
    Json(hub.channels().list_channels().await)
}
