//! The relay core: registry and channel store, plus the membership
//! transitions and fan-out that operate on them.
//!
//! Lock order is always connection gate, then one channel, then the
//! registry map. No two channel locks are ever held together.

mod broadcast;
mod membership;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::rooms::{ChannelStore, MessageContent};
use crate::users::{ConnectionId, ConnectionRegistry};

pub struct Hub {
    registry: ConnectionRegistry,
    channels: ChannelStore,
    config: RelayConfig,
}

impl Hub {
    pub async fn new(config: RelayConfig) -> Self {
        let channels = ChannelStore::new(config.history_limit);
        for (id, name) in &config.default_channels {
            channels.create(id, name).await;
        }
        Self {
            registry: ConnectionRegistry::new(),
            channels,
            config,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn channels(&self) -> &ChannelStore {
        &self.channels
    }

    /// Open a connection: assign an id and hand back the receiving end of its outbox.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<Arc<ServerEvent>>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.config.outbox_capacity.max(1));
        self.registry.attach(id, tx).await;
        (id, rx)
    }

    /// Route one inbound event from `id`.
    pub async fn dispatch(&self, id: ConnectionId, event: ClientEvent) {
        tracing::trace!(connection = %id, event = event.name(), "dispatch");
        match event {
            ClientEvent::Register(p) => self.register(id, p.display_name.as_deref()).await,
            ClientEvent::JoinChannel(p) => self.join(id, &p.channel_id).await,
            ClientEvent::LeaveChannel => self.leave(id).await,
            ClientEvent::TextMessage(p) => {
                self.relay_content_message(id, MessageContent::Text { text: p.text })
                    .await;
            }
            ClientEvent::VoiceMessage(p) => {
                self.relay_content_message(
                    id,
                    MessageContent::Voice {
                        audio_blob_ref: p.audio_blob_ref,
                    },
                )
                .await;
            }
            ClientEvent::MediaMessage(p) => {
                self.relay_content_message(id, MessageContent::media(p.media_kind, p.url, p.caption))
                    .await;
            }
            ClientEvent::Talking(p) => {
                self.relay_presence(id, p.talking).await;
            }
        }
    }
}
