//! Presence and typing state, derived purely from inbound push events.
//!
//! Nothing here is authoritative: deltas patch the sets, a snapshot replaces
//! the online set wholesale (used after reconnects, when deltas may have been
//! missed), and everything is reset on identity loss. Typing has no expiry;
//! a peer that vanishes mid-keystroke stays "typing" until an explicit stop
//! arrives or the conversation closes. The view projection hides typing for
//! users missing from the online set.

use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Default)]
pub(crate) struct PresenceTracker {
    online: HashSet<String>,
    last_seen: HashMap<String, i64>,
    typing: HashMap<String, BTreeSet<String>>,
}

impl PresenceTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_online(&mut self, user_id: &str) {
        self.online.insert(user_id.to_string());
        self.last_seen.remove(user_id);
    }

    pub(crate) fn on_offline(&mut self, user_id: &str, last_seen: i64) {
        self.online.remove(user_id);
        self.last_seen.insert(user_id.to_string(), last_seen);
    }

    /// Wholesale replacement of the online set.
    pub(crate) fn on_snapshot(&mut self, user_ids: Vec<String>) {
        self.online = user_ids.into_iter().collect();
        for user in &self.online {
            self.last_seen.remove(user);
        }
    }

    pub(crate) fn on_typing(&mut self, conversation_id: &str, user_id: &str, is_typing: bool) {
        let set = self.typing.entry(conversation_id.to_string()).or_default();
        if is_typing {
            set.insert(user_id.to_string());
        } else {
            set.remove(user_id);
        }
    }

    pub(crate) fn clear_typing(&mut self, conversation_id: &str) {
        self.typing.remove(conversation_id);
    }

    pub(crate) fn is_online(&self, user_id: &str) -> bool {
        self.online.contains(user_id)
    }

    pub(crate) fn last_seen(&self, user_id: &str) -> Option<i64> {
        self.last_seen.get(user_id).copied()
    }

    pub(crate) fn typing_in(&self, conversation_id: &str) -> Vec<String> {
        self.typing
            .get(conversation_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn reset(&mut self) {
        self.online.clear();
        self.last_seen.clear();
        self.typing.clear();
    }
}
