//! Per-user conversation history.
//!
//! Each user gets a [`Conversation`]: encoded turns, oldest first, capped at
//! a configurable length with FIFO eviction. The [`HistoryStore`] hands out
//! one conversation at a time behind a per-user async lock so that a request
//! owns its user's history for as long as it runs. History lives only in
//! memory and is lost on restart.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_lock::{Mutex, MutexGuardArc};
use tracing::debug;

use crate::model::TokenId;

/// Default number of turns kept per user.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Turn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Bot,
}

/// One encoded unit of conversation, always terminated by EOS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub tokens: Vec<TokenId>,
}

impl Turn {
    pub fn user(tokens: Vec<TokenId>) -> Self {
        Self {
            speaker: Speaker::User,
            tokens,
        }
    }

    pub fn bot(tokens: Vec<TokenId>) -> Self {
        Self {
            speaker: Speaker::Bot,
            tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: VecDeque<Turn>,
    /// `None` means unbounded.
    limit: Option<usize>,
}

impl Conversation {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            turns: VecDeque::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Append a turn, evicting the oldest ones past the limit.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        if let Some(limit) = self.limit {
            while self.turns.len() > limit {
                self.turns.pop_front();
            }
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Model input: the most recent turns followed by `query`, never longer
    /// than `budget` tokens. Older turns that do not fit are left out of the
    /// input but stay in the history. Returns `None` if `query` alone is
    /// over budget.
    pub fn context_with(&self, query: &[TokenId], budget: usize) -> Option<Vec<TokenId>> {
        if query.len() > budget {
            return None;
        }

        let mut used = query.len();
        let mut first_kept = self.turns.len();
        for (idx, turn) in self.turns.iter().enumerate().rev() {
            if used + turn.tokens.len() > budget {
                break;
            }
            used += turn.tokens.len();
            first_kept = idx;
        }

        if first_kept > 0 {
            debug!(
                dropped_turns = first_kept,
                budget, "history truncated to fit the model context"
            );
        }

        let mut input = Vec::with_capacity(used);
        for turn in self.turns.iter().skip(first_kept) {
            input.extend_from_slice(&turn.tokens);
        }
        input.extend_from_slice(query);
        Some(input)
    }
}

// ---------------------------------------------------------------------------
// HistoryStore
// ---------------------------------------------------------------------------

/// Exclusive access to one user's conversation for the duration of a request.
pub type ConversationGuard = MutexGuardArc<Conversation>;

/// All users' conversations. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct HistoryStore {
    limit: Option<usize>,
    users: Mutex<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl HistoryStore {
    /// `limit` of `None` keeps every turn.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            users: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    async fn entry(&self, user_id: &str) -> Arc<Mutex<Conversation>> {
        let mut users = self.users.lock().await;
        users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new(self.limit))))
            .clone()
    }

    /// Lock a user's conversation, creating it on first use. Other requests
    /// from the same user wait until the guard is dropped.
    pub async fn lock(&self, user_id: &str) -> ConversationGuard {
        self.entry(user_id).await.lock_arc().await
    }

    /// Number of turns stored for a user (0 if never seen).
    pub async fn len(&self, user_id: &str) -> usize {
        let entry = {
            let users = self.users.lock().await;
            users.get(user_id).cloned()
        };
        match entry {
            Some(convo) => convo.lock().await.len(),
            None => 0,
        }
    }

    /// Empty a user's conversation. Waits for any in-flight request of that
    /// user to finish first.
    pub async fn clear(&self, user_id: &str) {
        self.lock(user_id).await.clear();
    }

    /// Number of users with a conversation entry.
    pub async fn user_count(&self) -> usize {
        self.users.lock().await.len()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(Some(DEFAULT_HISTORY_LIMIT))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(HistoryStore: Send, Sync);
    assert_impl_all!(ConversationGuard: Send, Sync);

    fn turn(tokens: &[TokenId]) -> Turn {
        Turn::user(tokens.to_vec())
    }

    // -- Conversation ------------------------------------------------------

    #[test]
    fn push_evicts_oldest_first() {
        let mut convo = Conversation::new(Some(3));
        for i in 0..5 {
            convo.push(turn(&[i]));
        }
        assert_eq!(convo.len(), 3);
        let firsts: Vec<TokenId> = convo.turns().map(|t| t.tokens[0]).collect();
        assert_eq!(firsts, vec![2, 3, 4]);
    }

    #[test]
    fn unbounded_conversation_keeps_everything() {
        let mut convo = Conversation::new(None);
        for i in 0..50 {
            convo.push(turn(&[i]));
        }
        assert_eq!(convo.len(), 50);
    }

    #[test]
    fn clear_empties_regardless_of_length() {
        let mut convo = Conversation::new(None);
        for i in 0..20 {
            convo.push(turn(&[i]));
        }
        convo.clear();
        assert!(convo.is_empty());
    }

    #[test]
    fn context_concatenates_history_then_query() {
        let mut convo = Conversation::new(None);
        convo.push(turn(&[1, 2, 0]));
        convo.push(Turn::bot(vec![3, 0]));
        let input = convo.context_with(&[4, 0], 100).unwrap();
        assert_eq!(input, vec![1, 2, 0, 3, 0, 4, 0]);
    }

    #[test]
    fn context_drops_oldest_turns_over_budget() {
        let mut convo = Conversation::new(None);
        convo.push(turn(&[1, 1, 1, 0]));
        convo.push(turn(&[2, 2, 0]));
        let input = convo.context_with(&[3, 0], 5).unwrap();
        assert_eq!(input, vec![2, 2, 0, 3, 0]);
        // history itself is untouched
        assert_eq!(convo.len(), 2);
    }

    #[test]
    fn context_rejects_oversized_query() {
        let convo = Conversation::new(None);
        assert!(convo.context_with(&[1, 2, 3], 2).is_none());
    }

    #[test]
    fn context_stops_at_first_turn_that_does_not_fit() {
        let mut convo = Conversation::new(None);
        convo.push(turn(&[1, 0]));
        convo.push(turn(&[2, 2, 2, 2, 0]));
        convo.push(turn(&[3, 0]));
        // [1,0] would fit on its own but is older than a turn that doesn't.
        let input = convo.context_with(&[4, 0], 6).unwrap();
        assert_eq!(input, vec![3, 0, 4, 0]);
    }

    // -- HistoryStore ------------------------------------------------------

    #[tokio::test]
    async fn store_creates_entries_lazily() {
        let store = HistoryStore::default();
        assert_eq!(store.user_count().await, 0);
        assert_eq!(store.len("alice").await, 0);
        assert_eq!(store.user_count().await, 0);

        store.lock("alice").await.push(turn(&[1]));
        assert_eq!(store.user_count().await, 1);
        assert_eq!(store.len("alice").await, 1);
    }

    #[tokio::test]
    async fn store_applies_limit_to_every_user() {
        let store = HistoryStore::new(Some(2));
        for user in ["a", "b"] {
            let mut convo = store.lock(user).await;
            for i in 0..5 {
                convo.push(turn(&[i]));
            }
        }
        assert_eq!(store.len("a").await, 2);
        assert_eq!(store.len("b").await, 2);
    }

    #[tokio::test]
    async fn clearing_one_user_leaves_others_alone() {
        let store = HistoryStore::default();
        store.lock("a").await.push(turn(&[1]));
        store.lock("b").await.push(turn(&[2]));
        store.clear("a").await;
        assert_eq!(store.len("a").await, 0);
        assert_eq!(store.len("b").await, 1);
    }

    #[tokio::test]
    async fn same_user_requests_are_serialized() {
        let store = Arc::new(HistoryStore::default());
        let guard = store.lock("a").await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.lock("a").await.push(turn(&[9]));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        // a different user is not blocked
        assert_eq!(store.len("b").await, 0);

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(store.len("a").await, 1);
    }
}
