//! Command queue
//!
//! Ordered queue of outbound commands with two priority levels. The head
//! entry is the single inflight command and is never displaced by
//! insertion, compression or reordering.

use super::message::{Command, ResponseState};

/// Outcome of inserting a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Appended or inserted as a new entry
    Queued,
    /// Replaced the tail entry (compression)
    Compressed,
    /// Dropped: identical wire form already at the tail
    Duplicate,
}

/// Two-priority command queue with single-inflight semantics.
///
/// Invariant: priorities are non-increasing from head to tail.
pub struct CommandQueue {
    items: Vec<Command>,
    compression: bool,
}

impl CommandQueue {
    pub fn new(compression: bool) -> Self {
        Self {
            items: Vec::new(),
            compression,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The inflight command, if any.
    pub fn head(&self) -> Option<&Command> {
        self.items.first()
    }

    pub fn tail(&self) -> Option<&Command> {
        self.items.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.items.iter()
    }

    /// Insert a command according to its priority.
    ///
    /// Repeated writes of the same register collapse onto the tail when
    /// compression is on; only the final value matters. An exact wire
    /// duplicate of the tail is dropped outright.
    pub fn insert(&mut self, cmd: Command) -> InsertOutcome {
        let len = self.items.len();
        if let Some(tail) = self.items.last_mut() {
            if tail.wire() == cmd.wire() {
                return InsertOutcome::Duplicate;
            }
            if self.compression && len > 1 && tail.identifier() == cmd.identifier() {
                *tail = cmd;
                return InsertOutcome::Compressed;
            }
        }

        if cmd.priority >= 1 && !self.items.is_empty() {
            // after the last priority-1 entry, but never before index 1
            let mut pos = 1;
            for (i, item) in self.items.iter().enumerate().skip(1) {
                if item.priority >= 1 {
                    pos = i + 1;
                }
            }
            self.items.insert(pos, cmd);
        } else {
            self.items.push(cmd);
        }
        InsertOutcome::Queued
    }

    /// Remove the first entry with the given identifier.
    pub fn delete(&mut self, identifier: &str) -> ResponseState {
        match self.items.iter().position(|c| c.identifier() == identifier) {
            Some(pos) => {
                self.items.remove(pos);
                ResponseState::Ok
            }
            None => ResponseState::UnknownId,
        }
    }

    /// Raise the head to priority 1 after the previous head retired.
    ///
    /// Returns true when a head is ready for transmission.
    pub fn promote_head(&mut self) -> bool {
        match self.items.first_mut() {
            Some(head) => {
                head.priority = 1;
                true
            }
            None => false,
        }
    }

    /// Check the ordering invariant; used by tests.
    pub fn priorities_non_increasing(&self) -> bool {
        self.items.windows(2).all(|w| w[0].priority >= w[1].priority)
    }
}
