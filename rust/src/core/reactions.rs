//! Optimistic reaction toggling with rollback.
//!
//! The local list mutates synchronously on toggle; the server call then
//! either confirms (its list is adopted wholesale, picking up concurrent
//! reactions from other users) or fails (the pre-optimistic baseline is
//! restored). Rapid re-toggles before the first call resolves are allowed:
//! the baseline is captured once, at the first in-flight call, and restored
//! only if the final outstanding call fails. Otherwise the last server
//! response wins.

use std::collections::HashMap;

use crate::state::ReactionEntry;

struct Inflight {
    baseline: Vec<ReactionEntry>,
    outstanding: u32,
}

#[derive(Default)]
pub(crate) struct ReactionToggler {
    inflight: HashMap<String, Inflight>,
}

impl ReactionToggler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pure toggle of `(user_id, emoji)` against `current`: present removes,
    /// absent adds with a local timestamp. Even toggle counts return to the
    /// original set.
    pub(crate) fn toggled(
        current: &[ReactionEntry],
        user_id: &str,
        emoji: &str,
        now: i64,
    ) -> Vec<ReactionEntry> {
        let mut next: Vec<ReactionEntry> = current.to_vec();
        let before = next.len();
        next.retain(|r| !(r.user_id == user_id && r.emoji == emoji));
        if next.len() == before {
            next.push(ReactionEntry {
                user_id: user_id.to_string(),
                emoji: emoji.to_string(),
                created_at: now,
            });
        }
        next
    }

    /// Record one in-flight toggle, capturing the rollback baseline at the
    /// first one.
    pub(crate) fn begin(&mut self, message_id: &str, current: &[ReactionEntry]) {
        let entry = self
            .inflight
            .entry(message_id.to_string())
            .or_insert_with(|| Inflight {
                baseline: current.to_vec(),
                outstanding: 0,
            });
        entry.outstanding += 1;
    }

    pub(crate) fn complete_ok(&mut self, message_id: &str) {
        if let Some(entry) = self.inflight.get_mut(message_id) {
            entry.outstanding = entry.outstanding.saturating_sub(1);
            if entry.outstanding == 0 {
                self.inflight.remove(message_id);
            }
        }
    }

    /// Returns the baseline to restore when the final outstanding toggle for
    /// this message failed; `None` while others are still in flight.
    pub(crate) fn complete_err(&mut self, message_id: &str) -> Option<Vec<ReactionEntry>> {
        let entry = self.inflight.get_mut(message_id)?;
        entry.outstanding = entry.outstanding.saturating_sub(1);
        if entry.outstanding == 0 {
            return self.inflight.remove(message_id).map(|e| e.baseline);
        }
        None
    }

    pub(crate) fn reset(&mut self) {
        self.inflight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::ReactionToggler;
    use crate::state::ReactionEntry;

    fn entry(user_id: &str, emoji: &str) -> ReactionEntry {
        ReactionEntry {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn even_toggle_count_returns_to_original_set() {
        let original = vec![entry("u2", "👍")];
        let once = ReactionToggler::toggled(&original, "u1", "👍", 10);
        assert_eq!(once.len(), 2);
        let twice = ReactionToggler::toggled(&once, "u1", "👍", 11);
        assert_eq!(twice, original);
    }

    #[test]
    fn toggle_is_unique_per_user_and_emoji() {
        let original = vec![entry("u1", "👍")];
        // A different emoji by the same user adds, not replaces.
        let next = ReactionToggler::toggled(&original, "u1", "❤️", 10);
        assert_eq!(next.len(), 2);
        // The same (user, emoji) removes.
        let next = ReactionToggler::toggled(&next, "u1", "👍", 11);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].emoji, "❤️");
    }

    #[test]
    fn failed_final_toggle_restores_the_first_baseline() {
        let mut toggler = ReactionToggler::new();
        let baseline = vec![entry("u2", "👍")];

        toggler.begin("m1", &baseline);
        let rolled_back = toggler.complete_err("m1");
        assert_eq!(rolled_back, Some(baseline));
        // Nothing left in flight afterwards.
        assert_eq!(toggler.complete_err("m1"), None);
    }

    #[test]
    fn rollback_waits_for_the_last_outstanding_call() {
        let mut toggler = ReactionToggler::new();
        let baseline = vec![entry("u2", "👍")];

        toggler.begin("m1", &baseline);
        let optimistic = ReactionToggler::toggled(&baseline, "u1", "👍", 10);
        toggler.begin("m1", &optimistic);

        // First failure: another call is still in flight, no rollback yet.
        assert_eq!(toggler.complete_err("m1"), None);
        // Final failure: restore the baseline captured before the first call.
        assert_eq!(toggler.complete_err("m1"), Some(baseline));
    }

    #[test]
    fn success_clears_the_inflight_record() {
        let mut toggler = ReactionToggler::new();
        toggler.begin("m1", &[]);
        toggler.complete_ok("m1");
        assert_eq!(toggler.complete_err("m1"), None);
    }
}
