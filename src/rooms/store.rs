//! Channel store: every channel ever joined, each behind its own lock.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::history::History;
use super::msg::{Message, MessageContent};
use crate::users::{ConnectionId, User};

pub type ChannelId = String;

/// One named room. Members and history only change through [`ChannelGuard`].
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    display_name: String,
    /// Mirrors `members.len()` so listings never take the lock.
    member_count: AtomicUsize,
    state: Mutex<ChannelState>,
}

#[derive(Debug)]
struct ChannelState {
    members: BTreeSet<ConnectionId>,
    history: History,
    last_message_id: u64,
}

/// Exclusive access to a channel's members and history.
pub struct ChannelGuard<'a> {
    channel: &'a Channel,
    state: MutexGuard<'a, ChannelState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub display_name: String,
    pub member_count: usize,
}

impl Channel {
    fn new(id: ChannelId, display_name: String, history_limit: usize) -> Self {
        Self {
            id,
            display_name,
            member_count: AtomicUsize::new(0),
            state: Mutex::new(ChannelState {
                members: BTreeSet::new(),
                history: History::new(history_limit),
                last_message_id: 0,
            }),
        }
    }

    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::Acquire)
    }

    pub async fn lock(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            channel: self,
            state: self.state.lock().await,
        }
    }

    fn summary(&self) -> ChannelSummary {
        ChannelSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            member_count: self.member_count(),
        }
    }
}

impl ChannelGuard<'_> {
    pub fn id(&self) -> &str {
        &self.channel.id
    }

    pub fn members(&self) -> &BTreeSet<ConnectionId> {
        &self.state.members
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.members.contains(&id)
    }

    /// Returns false if `id` was already a member.
    pub(crate) fn insert_member(&mut self, id: ConnectionId) -> bool {
        let added = self.state.members.insert(id);
        self.sync_count();
        added
    }

    /// Returns false if `id` was not a member.
    pub(crate) fn remove_member(&mut self, id: ConnectionId) -> bool {
        let removed = self.state.members.remove(&id);
        self.sync_count();
        removed
    }

    /// Stamp the next id onto a new message and log it.
    pub fn append_message(&mut self, sender: &User, content: MessageContent) -> Arc<Message> {
        self.state.last_message_id += 1;
        let msg = Arc::new(Message::new(self.state.last_message_id, sender, content));
        self.state.history.push(msg.clone());
        msg
    }

    pub fn recent_history(&self, limit: usize) -> Vec<Arc<Message>> {
        self.state.history.recent(limit)
    }

    fn sync_count(&self) {
        self.channel
            .member_count
            .store(self.state.members.len(), Ordering::Release);
    }
}

pub struct ChannelStore {
    channels: RwLock<HashMap<ChannelId, Arc<Channel>>>,
    history_limit: usize,
}

impl ChannelStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    /// Create a channel with an explicit display name. Returns false if it already exists.
    pub async fn create(&self, id: &str, display_name: &str) -> bool {
        let mut map = self.channels.write().await;
        if map.contains_key(id) {
            return false;
        }
        map.insert(
            id.to_owned(),
            Arc::new(Channel::new(
                id.to_owned(),
                display_name.to_owned(),
                self.history_limit,
            )),
        );
        true
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.read().await.get(id).cloned()
    }

    /// Existing channel, or a new empty one named after its id.
    pub async fn get_or_create(&self, id: &str) -> Arc<Channel> {
        if let Some(channel) = self.get(id).await {
            return channel;
        }
        let mut map = self.channels.write().await;
        map.entry(id.to_owned())
            .or_insert_with(|| {
                tracing::info!(channel = %id, "channel created");
                Arc::new(Channel::new(id.to_owned(), id.to_owned(), self.history_limit))
            })
            .clone()
    }

    /// Snapshot for discovery, sorted by id.
    pub async fn list_channels(&self) -> Vec<ChannelSummary> {
        let mut list: Vec<_> = self
            .channels
            .read()
            .await
            .values()
            .map(|channel| channel.summary())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Append under the channel's lock. `None` if the channel does not exist.
    pub async fn append_message(
        &self,
        channel_id: &str,
        sender: &User,
        content: MessageContent,
    ) -> Option<Arc<Message>> {
        let channel = self.get(channel_id).await?;
        let mut guard = channel.lock().await;
        Some(guard.append_message(sender, content))
    }

    pub async fn recent_history(&self, channel_id: &str, limit: usize) -> Vec<Arc<Message>> {
        match self.get(channel_id).await {
            Some(channel) => channel.lock().await.recent_history(limit),
            None => Vec::new(),
        }
    }
}
