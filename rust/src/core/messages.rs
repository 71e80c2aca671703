//! Per-conversation ordered message logs with optimistic drafts.
//!
//! Two identity regimes per message: a locally generated draft id until the
//! server acks, then the canonical server id. Invariants:
//! - at most one entry per draft id is ever visible; reconciliation replaces
//!   in place (same index, so scroll position survives) and never duplicates
//! - pushes are de-duplicated by canonical id, because a sender's own emit
//!   can arrive back as a push
//! - drafts keep their insertion position; canonical pushes are ordered by
//!   `created_at` but never inserted across a draft

use std::collections::HashMap;

use crate::state::ReactionEntry;

#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: i64,
    pub is_read: bool,
    pub is_draft: bool,
    pub reactions: Vec<ReactionEntry>,
}

#[derive(Default)]
pub(crate) struct MessageStore {
    logs: HashMap<String, Vec<StoredMessage>>,
}

impl MessageStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hydrate a conversation from a REST fetch. Outstanding drafts survive
    /// the refetch (they are not on the server yet) and stay at the tail.
    pub(crate) fn replace_all(&mut self, conversation_id: &str, mut messages: Vec<StoredMessage>) {
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let fetched_ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        if let Some(old) = self.logs.get_mut(conversation_id) {
            for entry in old.drain(..) {
                if entry.is_draft && !fetched_ids.contains(&entry.id) {
                    messages.push(entry);
                }
            }
        }
        self.logs.insert(conversation_id.to_string(), messages);
    }

    pub(crate) fn append_draft(&mut self, conversation_id: &str, draft: StoredMessage) {
        self.logs
            .entry(conversation_id.to_string())
            .or_default()
            .push(draft);
    }

    /// Replace the draft (matched by its temporary id, not by content) with
    /// the canonical record, in place. If the echo push beat the ack and the
    /// canonical id is already visible, the draft is dropped instead; the
    /// no-duplicate invariant wins over positional continuity.
    pub(crate) fn reconcile(
        &mut self,
        conversation_id: &str,
        draft_id: &str,
        canonical: StoredMessage,
    ) -> bool {
        let Some(log) = self.logs.get_mut(conversation_id) else {
            return false;
        };
        let Some(idx) = log.iter().position(|m| m.id == draft_id) else {
            return false;
        };
        if log.iter().any(|m| m.id == canonical.id && m.id != draft_id) {
            log.remove(idx);
        } else {
            log[idx] = canonical;
        }
        true
    }

    pub(crate) fn remove(&mut self, conversation_id: &str, message_id: &str) -> bool {
        let Some(log) = self.logs.get_mut(conversation_id) else {
            return false;
        };
        let before = log.len();
        log.retain(|m| m.id != message_id);
        log.len() != before
    }

    /// Merge an inbound push. Returns false when the canonical id is already
    /// present (own echo, relay redelivery).
    pub(crate) fn on_push(&mut self, conversation_id: &str, message: StoredMessage) -> bool {
        let log = self.logs.entry(conversation_id.to_string()).or_default();
        if log.iter().any(|m| m.id == message.id) {
            return false;
        }
        // Walk back over newer canonical entries only; a draft acts as a
        // floor so its position is never disturbed.
        let mut idx = log.len();
        while idx > 0 {
            let prev = &log[idx - 1];
            if prev.is_draft || prev.created_at <= message.created_at {
                break;
            }
            idx -= 1;
        }
        log.insert(idx, message);
        true
    }

    pub(crate) fn mark_read(&mut self, conversation_id: &str) {
        if let Some(log) = self.logs.get_mut(conversation_id) {
            for m in log.iter_mut() {
                m.is_read = true;
            }
        }
    }

    pub(crate) fn set_reactions(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        reactions: Vec<ReactionEntry>,
    ) -> bool {
        let Some(log) = self.logs.get_mut(conversation_id) else {
            return false;
        };
        let Some(m) = log.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        m.reactions = reactions;
        true
    }

    pub(crate) fn reactions_of(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Option<Vec<ReactionEntry>> {
        self.logs
            .get(conversation_id)?
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.reactions.clone())
    }

    pub(crate) fn log(&self, conversation_id: &str) -> &[StoredMessage] {
        self.logs
            .get(conversation_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn last_message(&self, conversation_id: &str) -> Option<&StoredMessage> {
        self.logs.get(conversation_id)?.last()
    }

    pub(crate) fn reset(&mut self) {
        self.logs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageStore, StoredMessage};

    fn msg(id: &str, created_at: i64, is_draft: bool) -> StoredMessage {
        StoredMessage {
            id: id.to_string(),
            sender_id: "u1".to_string(),
            text: Some(format!("text-{id}")),
            image_url: None,
            reply_to: None,
            created_at,
            is_read: false,
            is_draft,
            reactions: vec![],
        }
    }

    #[test]
    fn draft_reconciles_in_place() {
        let mut store = MessageStore::new();
        store.on_push("c1", msg("m0", 10, false));
        store.append_draft("c1", msg("draft-1", 20, true));
        store.on_push("c1", msg("m2", 30, false));

        assert!(store.reconcile("c1", "draft-1", msg("m1", 20, false)));
        let log = store.log("c1");
        assert_eq!(log.len(), 3);
        // Same index as the draft held, so scroll position is preserved.
        assert_eq!(log[1].id, "m1");
        assert!(!log[1].is_draft);
    }

    #[test]
    fn echo_push_before_ack_leaves_single_canonical_entry() {
        let mut store = MessageStore::new();
        store.append_draft("c1", msg("draft-1", 20, true));

        // The echo of our own send arrives before the REST ack.
        assert!(store.on_push("c1", msg("m1", 20, false)));
        assert_eq!(store.log("c1").len(), 2);

        // Reconciliation must collapse back to one entry, the canonical one.
        assert!(store.reconcile("c1", "draft-1", msg("m1", 20, false)));
        let log = store.log("c1");
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, "m1");
    }

    #[test]
    fn echo_push_after_ack_is_ignored() {
        let mut store = MessageStore::new();
        store.append_draft("c1", msg("draft-1", 20, true));
        store.reconcile("c1", "draft-1", msg("m1", 20, false));

        assert!(!store.on_push("c1", msg("m1", 20, false)));
        assert_eq!(store.log("c1").len(), 1);
    }

    #[test]
    fn out_of_order_push_sorts_by_created_at_without_crossing_drafts() {
        let mut store = MessageStore::new();
        store.on_push("c1", msg("m1", 10, false));
        store.on_push("c1", msg("m3", 30, false));
        store.append_draft("c1", msg("draft-1", 25, true));

        // Late push: older than m3 but newer than m1. The draft acts as a
        // floor, so the push cannot slide past it into the canonical run.
        store.on_push("c1", msg("m2", 20, false));
        let ids: Vec<&str> = store.log("c1").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3", "draft-1", "m2"]);
    }

    #[test]
    fn remove_deletes_failed_draft() {
        let mut store = MessageStore::new();
        store.append_draft("c1", msg("draft-1", 20, true));
        assert!(store.remove("c1", "draft-1"));
        assert!(store.log("c1").is_empty());
        assert!(!store.remove("c1", "draft-1"));
    }

    #[test]
    fn mark_read_patches_all_entries() {
        let mut store = MessageStore::new();
        store.on_push("c1", msg("m1", 10, false));
        store.on_push("c1", msg("m2", 20, false));
        store.mark_read("c1");
        assert!(store.log("c1").iter().all(|m| m.is_read));
    }

    #[test]
    fn replace_all_keeps_outstanding_drafts_at_tail() {
        let mut store = MessageStore::new();
        store.append_draft("c1", msg("draft-1", 50, true));
        store.replace_all("c1", vec![msg("m2", 20, false), msg("m1", 10, false)]);

        let ids: Vec<&str> = store.log("c1").iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "draft-1"]);
    }

    #[test]
    fn pushes_for_other_conversations_never_touch_this_log() {
        let mut store = MessageStore::new();
        store.on_push("c1", msg("m1", 10, false));
        store.on_push("c2", msg("m2", 20, false));
        assert_eq!(store.log("c1").len(), 1);
        assert_eq!(store.log("c2").len(), 1);
    }
}
