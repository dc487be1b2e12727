//! Conversation history for one console session.
//!
//! Keeps the most recent exchanges only. Each request receives an immutable
//! snapshot, so a request in flight never sees history change underneath it.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::model::{History, Turn};

#[derive(Debug, Clone)]
pub struct Conversation {
    turns: VecDeque<Turn>,
    max_exchanges: usize,
}

impl Conversation {
    pub fn new(max_exchanges: usize) -> Self {
        Self { turns: VecDeque::new(), max_exchanges }
    }

    /// Record one question and its answer, dropping the oldest exchanges past
    /// the limit.
    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.max_exchanges == 0 {
            return;
        }
        self.turns.push_back(Turn::user(user));
        self.turns.push_back(Turn::assistant(assistant));
        while self.turns.len() > self.max_exchanges * 2 {
            self.turns.pop_front();
        }
    }

    pub fn snapshot(&self) -> History {
        Arc::from(self.turns.iter().cloned().collect::<Vec<_>>())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Number of stored turns (two per exchange).
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn keeps_latest_exchanges() {
        let mut c = Conversation::new(2);
        for i in 0..5 {
            c.push_exchange(format!("q{i}"), format!("a{i}"));
        }
        let history = c.snapshot();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q3");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[3].content, "a4");
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_pushes() {
        let mut c = Conversation::new(10);
        c.push_exchange("What is MAT 1?", "Same-day access.");
        let before = c.snapshot();
        c.push_exchange("And MAT 2?", "Choice.");
        assert_eq!(before.len(), 2);
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn clear_empties_history() {
        let mut c = Conversation::new(10);
        c.push_exchange("q", "a");
        c.clear();
        assert!(c.is_empty());
        assert!(c.snapshot().is_empty());
    }

    #[test]
    fn zero_limit_keeps_nothing() {
        let mut c = Conversation::new(0);
        c.push_exchange("q", "a");
        assert!(c.is_empty());
    }
}
