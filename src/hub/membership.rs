//! Membership transitions: register, join, leave, disconnect.
//!
//! Each transition holds the connection's gate for its whole run, so two
//! transitions on one connection never interleave. A connection removed
//! while a transition waits on its gate leaves the waiter a no-op.

use crate::protocol::ServerEvent;
use crate::rooms::ChannelGuard;
use crate::users::{ConnectionId, User};

use super::Hub;

impl Hub {
    /// Name (or rename) a connection and acknowledge it. Renaming inside a
    /// channel refreshes that channel's roster right away.
    pub async fn register(&self, id: ConnectionId, requested_name: Option<&str>) {
        let Some(gate) = self.registry.gate(id).await else {
            return;
        };
        let _turn = gate.lock().await;

        let Some(user) = self.registry.register(id, requested_name).await else {
            return;
        };
        tracing::info!(connection = %id, name = %user.display_name, "registered");

        self.send_to_connection(
            id,
            ServerEvent::Registered {
                connection_id: id,
                display_name: user.display_name.clone(),
            },
        )
        .await;

        if let Some(channel_id) = &user.current_channel {
            if let Some(channel) = self.channels.get(channel_id).await {
                let guard = channel.lock().await;
                self.broadcast_roster(&guard).await;
            }
        }
    }

    /// Move a connection into `channel_id`, leaving its previous channel first.
    pub async fn join(&self, id: ConnectionId, channel_id: &str) {
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            tracing::debug!(connection = %id, "join without channel id dropped");
            return;
        }
        let Some(gate) = self.registry.gate(id).await else {
            return;
        };
        let _turn = gate.lock().await;

        let Some(user) = self.registry.get(id).await else {
            tracing::debug!(connection = %id, "join from unregistered connection dropped");
            return;
        };

        let rejoin = user.current_channel.as_deref() == Some(channel_id);
        if !rejoin {
            self.leave_locked(&user).await;
        }

        let channel = self.channels.get_or_create(channel_id).await;
        let mut guard = channel.lock().await;
        guard.insert_member(id);
        self.registry
            .set_channel(id, Some(channel_id.to_owned()))
            .await;

        if !rejoin {
            tracing::info!(connection = %id, channel = %channel_id, "joined");
            self.broadcast_locked(
                &guard,
                ServerEvent::UserJoined {
                    connection_id: id,
                    display_name: user.display_name.clone(),
                },
                Some(id),
            )
            .await;
        }

        self.send_to_connection(
            id,
            ServerEvent::ChannelHistory {
                channel_id: channel_id.to_owned(),
                messages: guard.recent_history(self.config.history_limit),
            },
        )
        .await;
        self.broadcast_roster(&guard).await;
    }

    /// Drop a connection back to registered-but-nowhere. No-op outside a channel.
    pub async fn leave(&self, id: ConnectionId) {
        let Some(gate) = self.registry.gate(id).await else {
            return;
        };
        let _turn = gate.lock().await;

        if let Some(user) = self.registry.get(id).await {
            self.leave_locked(&user).await;
        }
    }

    /// Release everything a closed socket held. Safe to call more than once.
    pub async fn disconnect(&self, id: ConnectionId) {
        let Some(gate) = self.registry.gate(id).await else {
            return;
        };
        let _turn = gate.lock().await;

        if let Some(user) = self.registry.get(id).await {
            self.leave_locked(&user).await;
        }
        self.registry.remove(id).await;
        tracing::info!(connection = %id, "disconnected");
    }

    // Caller holds the connection's gate.
    async fn leave_locked(&self, user: &User) -> bool {
        let Some(channel_id) = &user.current_channel else {
            return false;
        };
        let id = user.connection_id;

        let Some(channel) = self.channels.get(channel_id).await else {
            self.registry.set_channel(id, None).await;
            return false;
        };
        let mut guard = channel.lock().await;
        let removed = guard.remove_member(id);
        self.registry.set_channel(id, None).await;

        if removed {
            tracing::info!(connection = %id, channel = %channel_id, "left");
            self.broadcast_locked(
                &guard,
                ServerEvent::UserLeft {
                    connection_id: id,
                    display_name: user.display_name.clone(),
                },
                None,
            )
            .await;
            self.broadcast_roster(&guard).await;
        }
        removed
    }

    pub(crate) async fn broadcast_roster(&self, guard: &ChannelGuard<'_>) -> usize {
        let users = self.registry.roster(guard.members()).await;
        self.broadcast_locked(
            guard,
            ServerEvent::ChannelUsers {
                channel_id: guard.id().to_owned(),
                users,
            },
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::config::RelayConfig;
    use crate::hub::testing::{drain, registered};
    use crate::hub::Hub;
    use crate::protocol::ServerEvent;
    use crate::users::ConnectionId;

    async fn hub() -> Hub {
        Hub::new(RelayConfig::default()).await
    }

    async fn members(hub: &Hub, channel: &str) -> HashSet<ConnectionId> {
        match hub.channels().get(channel).await {
            Some(channel) => channel.lock().await.members().iter().copied().collect(),
            None => HashSet::new(),
        }
    }

    #[tokio::test]
    async fn register_acknowledges_with_id() {
        let hub = hub().await;
        let (id, mut rx) = hub.connect().await;
        hub.register(id, Some("alice")).await;

        assert_eq!(
            drain(&mut rx),
            vec![ServerEvent::Registered {
                connection_id: id,
                display_name: "alice".into()
            }]
        );
    }

    #[tokio::test]
    async fn join_replies_with_history_then_roster() {
        let hub = hub().await;
        let (a, mut rx_a) = registered(&hub, "alice").await;
        hub.join(a, "general").await;

        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ServerEvent::ChannelHistory { channel_id, messages } if channel_id == "general" && messages.is_empty()
        ));
        match &events[1] {
            ServerEvent::ChannelUsers { users, .. } => {
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].id, a);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            hub.registry().get(a).await.unwrap().current_channel.as_deref(),
            Some("general")
        );
    }

    #[tokio::test]
    async fn unregistered_join_is_dropped() {
        let hub = hub().await;
        let (id, mut rx) = hub.connect().await;
        hub.join(id, "general").await;
        hub.join(ConnectionId::new(), "general").await;

        assert!(drain(&mut rx).is_empty());
        assert!(members(&hub, "general").await.is_empty());
    }

    #[tokio::test]
    async fn blank_channel_id_is_dropped() {
        let hub = hub().await;
        let (a, mut rx) = registered(&hub, "alice").await;
        hub.join(a, "   ").await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(hub.channels().list_channels().await.len(), 1);
    }

    #[tokio::test]
    async fn rejoining_does_not_duplicate_or_announce() {
        let hub = hub().await;
        let (a, mut rx_a) = registered(&hub, "alice").await;
        let (b, mut rx_b) = registered(&hub, "bob").await;
        hub.join(a, "general").await;
        hub.join(b, "general").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.join(a, "general").await;
        assert_eq!(members(&hub, "general").await.len(), 2);
        assert_eq!(hub.channels().get("general").await.unwrap().member_count(), 2);

        let to_b = drain(&mut rx_b);
        assert!(!to_b.iter().any(|e| matches!(e, ServerEvent::UserJoined { .. } | ServerEvent::UserLeft { .. })));
        assert!(to_b.iter().any(|e| matches!(e, ServerEvent::ChannelUsers { .. })));
        assert!(drain(&mut rx_a).iter().any(|e| matches!(e, ServerEvent::ChannelHistory { .. })));
    }

    #[tokio::test]
    async fn leave_then_rejoin() {
        let hub = hub().await;
        let (a, _rx_a) = registered(&hub, "alice").await;
        let (b, mut rx_b) = registered(&hub, "bob").await;
        hub.join(a, "general").await;
        hub.join(b, "general").await;
        drain(&mut rx_b);

        hub.leave(a).await;
        assert_eq!(members(&hub, "general").await, HashSet::from([b]));
        assert_eq!(hub.registry().get(a).await.unwrap().current_channel, None);
        let to_b = drain(&mut rx_b);
        assert_eq!(
            to_b[0],
            ServerEvent::UserLeft {
                connection_id: a,
                display_name: "alice".into()
            }
        );

        hub.leave(a).await;
        assert!(drain(&mut rx_b).is_empty());

        hub.join(a, "general").await;
        assert_eq!(members(&hub, "general").await, HashSet::from([a, b]));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let hub = hub().await;
        let (a, _rx_a) = registered(&hub, "alice").await;
        let (b, mut rx_b) = registered(&hub, "bob").await;
        hub.join(a, "general").await;
        hub.join(b, "general").await;
        drain(&mut rx_b);

        hub.disconnect(a).await;
        hub.disconnect(a).await;

        let left = drain(&mut rx_b)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::UserLeft { .. }))
            .count();
        assert_eq!(left, 1);
        assert!(hub.registry().get(a).await.is_none());
        assert_eq!(members(&hub, "general").await, HashSet::from([b]));
    }

    #[tokio::test]
    async fn rename_in_channel_refreshes_roster() {
        let hub = hub().await;
        let (a, _rx_a) = registered(&hub, "alice").await;
        let (b, mut rx_b) = registered(&hub, "bob").await;
        hub.join(a, "general").await;
        hub.join(b, "general").await;
        drain(&mut rx_b);

        hub.register(a, Some("alicia")).await;
        let to_b = drain(&mut rx_b);
        match to_b.as_slice() {
            [ServerEvent::ChannelUsers { users, .. }] => {
                let names: HashSet<_> = users.iter().map(|u| u.display_name.as_str()).collect();
                assert_eq!(names, HashSet::from(["alicia", "bob"]));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(
            hub.registry().get(a).await.unwrap().current_channel.as_deref(),
            Some("general")
        );
    }

    #[tokio::test]
    async fn racing_join_and_disconnect_leave_no_ghost() {
        let hub = Arc::new(hub().await);
        for _ in 0..50 {
            let (id, _rx) = registered(&hub, "racer").await;
            let joiner = {
                let hub = hub.clone();
                tokio::spawn(async move { hub.join(id, "tech").await })
            };
            let closer = {
                let hub = hub.clone();
                tokio::spawn(async move { hub.disconnect(id).await })
            };
            joiner.await.unwrap();
            closer.await.unwrap();
            assert!(hub.registry().get(id).await.is_none());
            assert!(!members(&hub, "tech").await.contains(&id));
        }
    }
}
