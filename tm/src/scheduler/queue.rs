//! Priority tiers and queue introspection types

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

use crate::domain::Priority;

/// One FIFO queue per priority tier
///
/// `pop_next` drains every `High` entry before any `Medium`, and every
/// `Medium` before any `Low`.
#[derive(Debug, Default)]
pub struct PriorityTiers {
    high: VecDeque<String>,
    medium: VecDeque<String>,
    low: VecDeque<String>,
}

impl PriorityTiers {
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, priority: Priority) -> &VecDeque<String> {
        match priority {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }

    fn tier_mut(&mut self, priority: Priority) -> &mut VecDeque<String> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    /// Append to the tail of `priority`'s tier
    pub fn push_back(&mut self, priority: Priority, task_id: impl Into<String>) {
        self.tier_mut(priority).push_back(task_id.into());
    }

    /// Take the head of the highest non-empty tier
    pub fn pop_next(&mut self) -> Option<(Priority, String)> {
        Priority::DISPATCH_ORDER
            .into_iter()
            .find_map(|p| self.tier_mut(p).pop_front().map(|id| (p, id)))
    }

    /// Remove `task_id` wherever it is queued
    pub fn remove(&mut self, task_id: &str) -> bool {
        for p in Priority::DISPATCH_ORDER {
            let tier = self.tier_mut(p);
            if let Some(pos) = tier.iter().position(|id| id == task_id) {
                tier.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn contains(&self, task_id: &str) -> bool {
        Priority::DISPATCH_ORDER
            .into_iter()
            .any(|p| self.tier(p).iter().any(|id| id == task_id))
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        self.tier(priority).len()
    }

    /// Queued ids in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = (Priority, &str)> {
        Priority::DISPATCH_ORDER
            .into_iter()
            .flat_map(move |p| self.tier(p).iter().map(move |id| (p, id.as_str())))
    }
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_rejected: u64,
    pub total_dispatched: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_cancelled: u64,
    pub total_timed_out: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// Queue counts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub running: usize,
    pub queued: usize,
    pub queued_high: usize,
    pub queued_medium: usize,
    pub queued_low: usize,
    pub stats: SchedulerStats,
}

/// One queued or running task
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task_id: String,
    pub priority: Priority,
    pub status: QueueEntryStatus,
    pub worker_id: Option<String>,
    /// Time spent in the current status
    pub wait_time: Duration,
}

/// Status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryStatus {
    Running,
    Queued,
}
