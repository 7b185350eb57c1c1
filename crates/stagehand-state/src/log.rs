//! Bounded, ordered log of evaluated events kept for overlay replay.

use serde::Serialize;
use stagehand_types::{AppEvent, EvaluatedEvent};
use std::collections::VecDeque;

/// An evaluated event with its position in the global sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedEvent {
    pub seq: u64,
    pub payload: EvaluatedEvent,
}

/// FIFO ring of [`LoggedEvent`]s, oldest first.
#[derive(Debug, Clone)]
pub struct EventLog {
    capacity: usize,
    entries: VecDeque<LoggedEvent>,
}

impl EventLog {
    /// Creates an empty log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the bound, evicting the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }

    pub fn push(&mut self, entry: LoggedEvent) {
        self.entries.push_back(entry);
        self.evict();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoggedEvent> {
        self.entries.iter()
    }

    /// Finds the entry whose event has id `id`.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut LoggedEvent> {
        self.entries.iter_mut().find(|e| e.payload.event.id() == id)
    }

    /// Chat entries sent by the user with login `login` (case-insensitive).
    pub fn chat_from_login_mut<'a>(
        &'a mut self,
        login: &'a str,
    ) -> impl Iterator<Item = &'a mut LoggedEvent> + 'a {
        self.entries.iter_mut().filter(move |e| match &e.payload.event {
            AppEvent::ChatMessage(m) => m
                .user
                .login
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(login)),
            _ => false,
        })
    }

    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<LoggedEvent> {
        self.entries.iter().cloned().collect()
    }
}
