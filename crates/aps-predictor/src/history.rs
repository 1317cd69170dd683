//! Bounded per-subject event history

use crate::event::BehaviorEvent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Most recent events of one subject, oldest first
#[derive(Debug, Clone)]
pub(crate) struct SubjectHistory {
    events: VecDeque<BehaviorEvent>,
    capacity: usize,
    last_seen: DateTime<Utc>,
}

impl SubjectHistory {
    pub(crate) fn new(capacity: usize, now: DateTime<Utc>) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(128)),
            capacity: capacity.max(1),
            last_seen: now,
        }
    }

    /// Append, evicting the oldest event when full
    pub(crate) fn push(&mut self, event: BehaviorEvent, now: DateTime<Utc>) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.last_seen = now;
    }

    #[inline]
    pub(crate) fn events(&self) -> &VecDeque<BehaviorEvent> {
        &self.events
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub(crate) fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }
}
