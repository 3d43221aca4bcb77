//! Connection registry: every open socket, its outbox, and the profile it
//! registered with.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol::ServerEvent;
use crate::rooms::ChannelId;

/// Longest display name kept after trimming.
pub const MAX_NAME_CHARS: usize = 32;

const ADJECTIVES: &[&str] = &[
    "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
    "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
    "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
];

const NOUNS: &[&str] = &[
    "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
    "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
    "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
];

/// Server-assigned identifier of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub current_channel: Option<ChannelId>,
}

/// Where events for one connection are queued before its writer task sends them.
pub type Outbox = mpsc::Sender<Arc<ServerEvent>>;

struct Connection {
    /// Taken on eviction so nothing more is queued and the writer drains out.
    outbox: Option<Outbox>,
    user: Option<User>,
    /// Serializes membership transitions for this connection.
    gate: Arc<Mutex<()>>,
    /// Cancelled when the connection fell too far behind to stay.
    evicted: CancellationToken,
}

/// Roster line sent in `channel-users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: ConnectionId,
    pub display_name: String,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened socket. It stays unregistered until `register`.
    pub async fn attach(&self, id: ConnectionId, outbox: Outbox) {
        self.connections.write().await.insert(
            id,
            Connection {
                outbox: Some(outbox),
                user: None,
                gate: Arc::new(Mutex::new(())),
                evicted: CancellationToken::new(),
            },
        );
    }

    /// Assign a display name. Re-registering renames but keeps the current channel.
    /// Returns `None` when the socket is already gone.
    pub async fn register(&self, id: ConnectionId, requested_name: Option<&str>) -> Option<User> {
        let display_name = normalize_name(requested_name);
        let mut map = self.connections.write().await;
        let conn = map.get_mut(&id)?;
        let user = match conn.user.take() {
            Some(existing) => User {
                display_name,
                ..existing
            },
            None => User {
                connection_id: id,
                display_name,
                current_channel: None,
            },
        };
        conn.user = Some(user.clone());
        Some(user)
    }

    /// Registered profile for `id`. Absent for unknown or not-yet-registered sockets.
    pub async fn get(&self, id: ConnectionId) -> Option<User> {
        self.connections.read().await.get(&id)?.user.clone()
    }

    /// Forget the connection entirely.
    pub async fn remove(&self, id: ConnectionId) -> Option<User> {
        self.connections.write().await.remove(&id)?.user
    }

    pub async fn outbox(&self, id: ConnectionId) -> Option<Outbox> {
        self.connections.read().await.get(&id)?.outbox.clone()
    }

    /// Outboxes for every id still attached and not evicted, in the order given.
    pub async fn outboxes<'a, I>(&self, ids: I) -> Vec<(ConnectionId, Outbox)>
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let map = self.connections.read().await;
        ids.into_iter()
            .filter_map(|id| Some((*id, map.get(id)?.outbox.clone()?)))
            .collect()
    }

    /// Token the socket task waits on. Cancelled by `evict`.
    pub async fn eviction(&self, id: ConnectionId) -> Option<CancellationToken> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|conn| conn.evicted.clone())
    }

    /// Stop queueing for a connection that cannot keep up and tell its socket
    /// task to hang up. The entry stays until that task runs `disconnect`.
    pub(crate) async fn evict(&self, id: ConnectionId) -> bool {
        let mut map = self.connections.write().await;
        let Some(conn) = map.get_mut(&id) else {
            return false;
        };
        conn.outbox = None;
        conn.evicted.cancel();
        true
    }

    /// Roster lines for the registered ids among `ids`.
    pub async fn roster<'a, I>(&self, ids: I) -> Vec<RosterEntry>
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let map = self.connections.read().await;
        ids.into_iter()
            .filter_map(|id| map.get(id)?.user.as_ref())
            .map(|user| RosterEntry {
                id: user.connection_id,
                display_name: user.display_name.clone(),
            })
            .collect()
    }

    /// Number of registered users.
    pub async fn count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.user.is_some())
            .count()
    }

    pub(crate) async fn gate(&self, id: ConnectionId) -> Option<Arc<Mutex<()>>> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|conn| conn.gate.clone())
    }

    pub(crate) async fn set_channel(&self, id: ConnectionId, channel: Option<ChannelId>) -> bool {
        let mut map = self.connections.write().await;
        match map.get_mut(&id).and_then(|conn| conn.user.as_mut()) {
            Some(user) => {
                user.current_channel = channel;
                true
            }
            None => false,
        }
    }
}

/// Trimmed and capped requested name, or a generated alias when blank.
pub fn normalize_name(requested: Option<&str>) -> String {
    match requested.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.chars().take(MAX_NAME_CHARS).collect(),
        None => fallback_name(),
    }
}

pub fn fallback_name() -> String {
    let mut rng = rand::rng();
    format!(
        "{} {}",
        ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet"),
        NOUNS.choose(&mut rng).copied().unwrap_or("Radio"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> Outbox {
        mpsc::channel(4).0
    }

    #[test]
    fn blank_names_fall_back() {
        for blank in [None, Some(""), Some("   ")] {
            let name = normalize_name(blank);
            let (adjective, noun) = name.split_once(' ').expect("two words");
            assert!(ADJECTIVES.contains(&adjective), "{name}");
            assert!(NOUNS.contains(&noun), "{name}");
        }
    }

    #[test]
    fn names_are_trimmed_and_capped() {
        assert_eq!(normalize_name(Some("  alice ")), "alice");
        let long = "x".repeat(100);
        assert_eq!(normalize_name(Some(&long)).chars().count(), MAX_NAME_CHARS);
    }

    #[tokio::test]
    async fn unattached_connections_cannot_register() {
        let registry = ConnectionRegistry::new();
        assert!(registry.register(ConnectionId::new(), Some("ghost")).await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn attached_but_unregistered_is_invisible() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        registry.attach(id, outbox()).await;
        assert!(registry.get(id).await.is_none());
        assert!(registry.outbox(id).await.is_some());
        assert!(!registry.set_channel(id, Some("general".into())).await);
    }

    #[tokio::test]
    async fn reregistering_keeps_channel() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        registry.attach(id, outbox()).await;
        registry.register(id, Some("alice")).await;
        assert!(registry.set_channel(id, Some("general".into())).await);

        let user = registry.register(id, Some("alicia")).await.unwrap();
        assert_eq!(user.display_name, "alicia");
        assert_eq!(user.current_channel.as_deref(), Some("general"));
        assert_eq!(registry.get(id).await, Some(user));
    }

    #[tokio::test]
    async fn remove_forgets_everything() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        registry.attach(id, outbox()).await;
        registry.register(id, Some("bob")).await;

        let removed = registry.remove(id).await.unwrap();
        assert_eq!(removed.display_name, "bob");
        assert!(registry.get(id).await.is_none());
        assert!(registry.outbox(id).await.is_none());
        assert!(registry.gate(id).await.is_none());
        assert!(registry.remove(id).await.is_none());
    }

    #[tokio::test]
    async fn eviction_closes_the_outbox_but_keeps_the_entry() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.attach(id, tx).await;
        registry.register(id, Some("slow")).await;
        let token = registry.eviction(id).await.unwrap();

        assert!(registry.evict(id).await);
        assert!(token.is_cancelled());
        assert!(registry.outbox(id).await.is_none());
        assert!(registry.outboxes([&id]).await.is_empty());
        assert!(rx.recv().await.is_none());
        // still registered until its socket task disconnects
        assert!(registry.get(id).await.is_some());

        registry.remove(id).await;
        assert!(!registry.evict(id).await);
    }

    #[tokio::test]
    async fn roster_skips_unregistered() {
        let registry = ConnectionRegistry::new();
        let (a, b) = (ConnectionId::new(), ConnectionId::new());
        registry.attach(a, outbox()).await;
        registry.attach(b, outbox()).await;
        registry.register(a, Some("alice")).await;

        let roster = registry.roster([&a, &b]).await;
        assert_eq!(
            roster,
            vec![RosterEntry {
                id: a,
                display_name: "alice".into()
            }]
        );
    }
}
