//! Bounded per-channel message log.
//!
//! Holds at most `cap` messages; pushing onto a full log evicts the oldest.

use std::collections::VecDeque;
use std::sync::Arc;

use super::msg::Message;

#[derive(Debug)]
pub struct History {
    cap: usize,
    entries: VecDeque<Arc<Message>>,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, msg: Arc<Message>) {
        if self.cap == 0 {
            return;
        }
        while self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(msg);
    }

    /// The most recent `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<Message>> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
