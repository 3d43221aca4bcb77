pub mod history;
mod list;
mod msg;
mod store;
pub mod ws;

use axum::{routing::get, Router};

use crate::AppState;

pub use msg::{MediaKind, Message, MessageContent};
pub use store::{Channel, ChannelGuard, ChannelId, ChannelStore, ChannelSummary};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/channels", get(list::list_channels))
        .route("/ws", get(ws::channel_ws))
}
