//! Fan-out. Recipients are read from the member set under the channel lock,
//! so anyone who already left never sees the event. One unreachable
//! recipient never stops delivery to the rest. A recipient whose outbox is
//! full is evicted: it gets nothing more, and its socket task hangs up and
//! runs the normal disconnect.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::ServerEvent;
use crate::rooms::{ChannelGuard, Message, MessageContent};
use crate::users::{ConnectionId, Outbox};

use super::Hub;

impl Hub {
    /// Deliver `event` to every current member of `channel_id` except `exclude`.
    /// Returns how many outboxes accepted it.
    pub async fn broadcast_to_channel(
        &self,
        channel_id: &str,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let Some(channel) = self.channels.get(channel_id).await else {
            return 0;
        };
        let guard = channel.lock().await;
        self.broadcast_locked(&guard, event, exclude).await
    }

    pub async fn send_to_connection(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let Some(outbox) = self.registry.outbox(id).await else {
            return false;
        };
        match deliver(id, &outbox, Arc::new(event)) {
            Delivery::Sent => true,
            Delivery::Overflow => {
                self.registry.evict(id).await;
                false
            }
            Delivery::Gone => false,
        }
    }

    /// Stamp, log, and echo a content message to the sender's whole channel
    /// (sender included). Dropped if the sender is in no channel.
    pub async fn relay_content_message(
        &self,
        id: ConnectionId,
        content: MessageContent,
    ) -> Option<Arc<Message>> {
        if content.is_empty() {
            tracing::debug!(connection = %id, "empty message dropped");
            return None;
        }
        let user = self.registry.get(id).await?;
        let Some(channel_id) = &user.current_channel else {
            tracing::debug!(connection = %id, "message outside any channel dropped");
            return None;
        };
        let channel = self.channels.get(channel_id).await?;

        let mut guard = channel.lock().await;
        if !guard.contains(id) {
            return None;
        }
        let msg = guard.append_message(&user, content);
        self.broadcast_locked(&guard, ServerEvent::for_message(msg.clone()), None)
            .await;
        Some(msg)
    }

    /// Tell the sender's channel, minus the sender, whether they are talking.
    pub async fn relay_presence(&self, id: ConnectionId, talking: bool) -> usize {
        let Some(user) = self.registry.get(id).await else {
            return 0;
        };
        let Some(channel_id) = &user.current_channel else {
            return 0;
        };
        let Some(channel) = self.channels.get(channel_id).await else {
            return 0;
        };

        let guard = channel.lock().await;
        if !guard.contains(id) {
            return 0;
        }
        self.broadcast_locked(
            &guard,
            ServerEvent::UserTalking {
                sender_id: id,
                display_name: user.display_name,
                talking,
            },
            Some(id),
        )
        .await
    }

    pub(crate) async fn broadcast_locked(
        &self,
        guard: &ChannelGuard<'_>,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let recipients = guard
            .members()
            .iter()
            .filter(|member| Some(**member) != exclude);
        let outboxes = self.registry.outboxes(recipients).await;
        let event = Arc::new(event);

        let mut sent = 0;
        let mut overflowed = Vec::new();
        for (id, outbox) in outboxes {
            match deliver(id, &outbox, event.clone()) {
                Delivery::Sent => sent += 1,
                Delivery::Overflow => overflowed.push(id),
                Delivery::Gone => {}
            }
        }
        for id in overflowed {
            self.registry.evict(id).await;
        }
        sent
    }
}

enum Delivery {
    Sent,
    /// The peer is not draining its outbox.
    Overflow,
    /// The peer is already on its way out.
    Gone,
}

fn deliver(id: ConnectionId, outbox: &Outbox, event: Arc<ServerEvent>) -> Delivery {
    match outbox.try_send(event) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(connection = %id, "outbox full, evicting");
            Delivery::Overflow
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(connection = %id, "outbox closed, event dropped");
            Delivery::Gone
        }
    }
}
