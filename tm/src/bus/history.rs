//! Bounded history ring of published messages

use std::collections::VecDeque;
use std::sync::Arc;

use crate::domain::Message;

/// A published message together with the topic it was published on
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub topic: String,
    pub message: Arc<Message>,
}

/// Fixed-capacity ring; the oldest entry is evicted first
#[derive(Debug)]
pub(crate) struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl History {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, topic: &str, message: Arc<Message>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            topic: topic.to_string(),
            message,
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn for_topic(&self, topic: &str) -> Vec<Arc<Message>> {
        self.entries
            .iter()
            .filter(|e| e.topic == topic)
            .map(|e| e.message.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
