// Projection from core state (message logs, presence, metadata) into the
// view types the UI renders. Pure reads; all mutation happens in the event
// handlers.

use std::cmp::Reverse;

use super::*;
use crate::core::messages::StoredMessage;

impl AppCore {
    pub(super) fn own_user_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.user_id.clone())
    }

    fn chat_message(&self, stored: &StoredMessage, own_id: &str) -> ChatMessage {
        ChatMessage {
            id: stored.id.clone(),
            sender_id: stored.sender_id.clone(),
            text: stored.text.clone(),
            image_url: stored.image_url.clone(),
            reply_to_message_id: stored.reply_to.clone(),
            timestamp: stored.created_at,
            is_read: stored.is_read,
            is_mine: stored.sender_id == own_id,
            delivery: if stored.is_draft {
                MessageDeliveryState::Pending
            } else {
                MessageDeliveryState::Sent
            },
            reactions: stored.reactions.clone(),
        }
    }

    fn preview_of(&self, meta: &ConversationMeta) -> (Option<String>, Option<i64>) {
        // The live log beats the fetched metadata once we have it.
        if let Some(last) = self.store.last_message(&meta.conversation_id) {
            let text = last
                .text
                .clone()
                .or_else(|| last.image_url.as_ref().map(|_| "📷 Photo".to_string()));
            return (text, Some(last.created_at));
        }
        (meta.last_message.clone(), meta.last_message_at)
    }

    pub(super) fn refresh_conversation_list(&mut self) {
        let mut summaries: Vec<ConversationSummary> = self
            .conv_meta
            .values()
            .map(|meta| {
                let (last_message, last_message_at) = self.preview_of(meta);
                ConversationSummary {
                    conversation_id: meta.conversation_id.clone(),
                    peer_id: meta.peer_id.clone(),
                    title: meta.title.clone(),
                    avatar_url: meta.avatar_url.clone(),
                    last_message,
                    last_message_at,
                    unread_count: self
                        .unread_counts
                        .get(&meta.conversation_id)
                        .copied()
                        .unwrap_or(0),
                    peer_online: self.presence.is_online(&meta.peer_id),
                }
            })
            .collect();
        // Newest activity first; id as tiebreaker keeps the order stable.
        summaries.sort_by_key(|s| (Reverse(s.last_message_at), s.conversation_id.clone()));
        self.state.conversations = summaries;
        self.emit_conversation_list();
    }

    pub(super) fn refresh_current_conversation(&mut self) {
        let Some(conversation_id) = self
            .state
            .current_conversation
            .as_ref()
            .map(|c| c.conversation_id.clone())
        else {
            return;
        };
        let own_id = self.own_user_id().unwrap_or_default();
        let meta = self.conv_meta.get(&conversation_id).cloned();
        let (peer_id, title, avatar_url) = match meta {
            Some(m) => (m.peer_id, m.title, m.avatar_url),
            None => (String::new(), None, None),
        };

        let messages: Vec<ChatMessage> = self
            .store
            .log(&conversation_id)
            .iter()
            .map(|m| self.chat_message(m, &own_id))
            .collect();
        // A stale typing flag from a user who dropped off without sending a
        // stop is hidden rather than expired.
        let typing_user_ids: Vec<String> = self
            .presence
            .typing_in(&conversation_id)
            .into_iter()
            .filter(|u| u != &own_id && self.presence.is_online(u))
            .collect();

        self.state.current_conversation = Some(ConversationViewState {
            conversation_id,
            peer_id: peer_id.clone(),
            title,
            avatar_url,
            messages,
            peer_online: self.presence.is_online(&peer_id),
            peer_last_seen: self.presence.last_seen(&peer_id),
            typing_user_ids,
        });
        self.emit_current_conversation();
    }

    pub(super) fn refresh_current_if_open(&mut self, conversation_id: &str) {
        let open = self
            .state
            .current_conversation
            .as_ref()
            .is_some_and(|c| c.conversation_id == conversation_id);
        if open {
            self.refresh_current_conversation();
        }
    }

    pub(super) fn open_conversation_id(&self) -> Option<String> {
        self.state
            .current_conversation
            .as_ref()
            .map(|c| c.conversation_id.clone())
    }
}
