use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use bridge_core::now_utc;
use bridge_ollama::ChatMessage;
use chrono::{DateTime, Utc};

/// Stable identifier for a channel or direct-message thread.
pub type ConversationId = u64;

#[derive(Debug, Default)]
struct ChannelContext {
    turns: Vec<ChatMessage>,
    last_reset_at: Option<DateTime<Utc>>,
}

/// Owns all per-conversation message history.
///
/// Conversations are created lazily on first access. The outer map lock is
/// held only long enough to fetch or create the per-conversation entry, so
/// distinct conversations never contend with each other.
///
/// After any mutation, `turns.len() <= 2 * max_pairs`; trimming drops the
/// oldest turns first. History is memory-resident by design; a process
/// restart is the only destructor.
pub struct ContextStore {
    max_pairs: usize,
    channels: Mutex<HashMap<ConversationId, Arc<Mutex<ChannelContext>>>>,
}

impl ContextStore {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            max_pairs,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_pairs(&self) -> usize {
        self.max_pairs
    }

    /// Retained-turn bound: two messages per context pair.
    pub fn max_messages(&self) -> usize {
        self.max_pairs.saturating_mul(2)
    }

    fn channel(&self, conversation: ConversationId) -> Arc<Mutex<ChannelContext>> {
        lock_unpoisoned(&self.channels)
            .entry(conversation)
            .or_default()
            .clone()
    }

    /// Appends a turn and trims to the retained-turn bound.
    pub fn append(&self, conversation: ConversationId, message: ChatMessage) {
        let channel = self.channel(conversation);
        let mut guard = lock_unpoisoned(&channel);
        guard.turns.push(message);

        let max_messages = self.max_messages();
        if guard.turns.len() > max_messages {
            let overflow = guard.turns.len() - max_messages;
            guard.turns.drain(..overflow);
        }
    }

    /// Clears the conversation and stamps the reset marker, returning it so
    /// the caller can report the exact timestamp back to the user.
    pub fn reset(&self, conversation: ConversationId) -> DateTime<Utc> {
        let channel = self.channel(conversation);
        let mut guard = lock_unpoisoned(&channel);
        guard.turns.clear();
        let reset_at = now_utc();
        guard.last_reset_at = Some(reset_at);
        tracing::info!(conversation, "cleared conversation history");
        reset_at
    }

    /// Snapshot of the current ordered turn sequence.
    pub fn history(&self, conversation: ConversationId) -> Vec<ChatMessage> {
        let channel = self.channel(conversation);
        let guard = lock_unpoisoned(&channel);
        guard.turns.clone()
    }

    /// Removes the most recently appended turn. Used exclusively to roll
    /// back the pending user turn after a failed inference call.
    pub fn pop_last(&self, conversation: ConversationId) -> Option<ChatMessage> {
        let channel = self.channel(conversation);
        let mut guard = lock_unpoisoned(&channel);
        guard.turns.pop()
    }

    pub fn last_reset_at(&self, conversation: ConversationId) -> Option<DateTime<Utc>> {
        let channel = self.channel(conversation);
        let guard = lock_unpoisoned(&channel);
        guard.last_reset_at
    }

    pub fn turn_count(&self, conversation: ConversationId) -> usize {
        let channel = self.channel(conversation);
        let guard = lock_unpoisoned(&channel);
        guard.turns.len()
    }
}

/// Per-conversation model override map, independent of conversation state.
///
/// Set by the command surface, read by the orchestrator when choosing the
/// model for an inference call.
#[derive(Default)]
pub struct ModelOverrides {
    overrides: Mutex<HashMap<ConversationId, String>>,
}

impl ModelOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation: ConversationId) -> Option<String> {
        lock_unpoisoned(&self.overrides).get(&conversation).cloned()
    }

    pub fn set(&self, conversation: ConversationId, model: String) {
        lock_unpoisoned(&self.overrides).insert(conversation, model);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use bridge_ollama::ChatMessage;

    use super::*;

    #[test]
    fn history_starts_empty_for_unknown_conversations() {
        let store = ContextStore::new(10);
        assert!(store.history(42).is_empty());
        assert_eq!(store.turn_count(42), 0);
        assert!(store.last_reset_at(42).is_none());
    }

    #[test]
    fn append_trims_to_twice_max_pairs_keeping_the_newest() {
        let store = ContextStore::new(2);
        for index in 0..7 {
            store.append(1, ChatMessage::user(format!("turn {index}")));
        }

        let history = store.history(1);
        assert_eq!(history.len(), 4);
        let contents: Vec<&str> = history.iter().map(|turn| turn.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 3", "turn 4", "turn 5", "turn 6"]);
    }

    #[test]
    fn trim_bound_holds_after_any_mutation_sequence() {
        let store = ContextStore::new(3);
        for index in 0..25 {
            store.append(7, ChatMessage::user(format!("u{index}")));
            store.append(7, ChatMessage::assistant(format!("a{index}")));
            assert!(store.turn_count(7) <= 6);
        }
    }

    #[test]
    fn reset_clears_turns_and_stamps_the_marker() {
        let store = ContextStore::new(5);
        store.append(3, ChatMessage::user("hello"));
        let reset_at = store.reset(3);

        assert!(store.history(3).is_empty());
        assert_eq!(store.last_reset_at(3), Some(reset_at));
    }

    #[test]
    fn pop_last_removes_only_the_newest_turn() {
        let store = ContextStore::new(5);
        store.append(9, ChatMessage::user("first"));
        store.append(9, ChatMessage::assistant("second"));
        store.append(9, ChatMessage::user("third"));

        let popped = store.pop_last(9).expect("a turn should be present");
        assert_eq!(popped.content, "third");

        let contents: Vec<String> = store
            .history(9)
            .into_iter()
            .map(|turn| turn.content)
            .collect();
        assert_eq!(contents, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn conversations_are_isolated() {
        let store = ContextStore::new(5);
        store.append(1, ChatMessage::user("one"));
        store.append(2, ChatMessage::user("two"));

        assert_eq!(store.turn_count(1), 1);
        assert_eq!(store.turn_count(2), 1);
        store.reset(1);
        assert_eq!(store.turn_count(1), 0);
        assert_eq!(store.turn_count(2), 1);
    }

    #[test]
    fn model_overrides_are_independent_of_history() {
        let overrides = ModelOverrides::new();
        assert_eq!(overrides.get(1), None);
        overrides.set(1, "mistral".to_string());
        assert_eq!(overrides.get(1), Some("mistral".to_string()));
        assert_eq!(overrides.get(2), None);
    }
}
