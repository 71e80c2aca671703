// Session lifecycle + networking side effects. The only code that touches
// authentication state.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::*;
use crate::core::connection::EventHandler;
use crate::transport::{InboundSink, TransportEvent, WsTransport};

pub(super) struct Session {
    pub(super) user_id: String,
    pub(super) api: Arc<dyn ChatApi>,
    pub(super) conn: ConnectionManager,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresencePayload {
    user_id: String,
    #[serde(default)]
    last_seen: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    conversation_id: String,
    user_id: String,
    is_typing: bool,
}

/// Build a handler that decodes the push payload and re-enters the actor as
/// a typed `SocketEvent`. Malformed payloads are dropped with a debug log;
/// nothing inbound is allowed to error into the view layer.
fn typed_handler<T, F>(tx: &Sender<CoreMsg>, event_name: &'static str, map: F) -> EventHandler
where
    T: DeserializeOwned,
    F: Fn(T) -> SocketEvent + Send + Sync + 'static,
{
    let tx = tx.clone();
    Arc::new(move |data| match serde_json::from_value::<T>(data) {
        Ok(payload) => {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Push {
                event: map(payload),
            })));
        }
        Err(e) => {
            tracing::debug!(event = event_name, %e, "malformed push payload");
        }
    })
}

/// Handler for pushes whose payload carries nothing we consume.
fn signal_handler(tx: &Sender<CoreMsg>, event: SocketEvent) -> EventHandler {
    let tx = tx.clone();
    Arc::new(move |_| {
        let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::Push {
            event: event.clone(),
        })));
    })
}

impl AppCore {
    pub(super) fn start_session(&mut self, user_id: &str) -> anyhow::Result<()> {
        // Tear down any existing session first.
        self.stop_session();

        tracing::info!(user_id = %user_id, "start_session");

        let api: Arc<dyn ChatApi> = match self.api_override() {
            Some(api) => api,
            None => Arc::new(HttpChatApi::new(self.api_base_url())),
        };
        let transport: Arc<dyn SocketTransport> = match self.transport_override() {
            Some(t) => t,
            None => Arc::new(WsTransport::new(self.runtime.handle().clone())),
        };

        let inbound: InboundSink = {
            let tx = self.core_sender.clone();
            Arc::new(move |event| {
                let internal = match event {
                    TransportEvent::Connected => InternalEvent::SocketConnected,
                    TransportEvent::Disconnected => InternalEvent::SocketDisconnected,
                    TransportEvent::Frame(frame) => InternalEvent::SocketFrame { frame },
                };
                let _ = tx.send(CoreMsg::Internal(Box::new(internal)));
            })
        };

        let mut conn = ConnectionManager::new(transport, self.socket_url(), inbound);
        // Subscriptions land in the pending queue and attach on the first
        // connect, before the join signal and any queued emits.
        self.register_push_handlers(&mut conn);
        if self.network_enabled() {
            conn.connect(user_id)?;
        }

        self.session = Some(Session {
            user_id: user_id.to_string(),
            api,
            conn,
        });

        self.state.auth = AuthState::LoggedIn {
            user_id: user_id.to_string(),
        };
        self.emit_auth();
        self.handle_auth_transition(true);

        self.refresh_conversations();
        Ok(())
    }

    pub(super) fn stop_session(&mut self) {
        if let Some(mut sess) = self.session.take() {
            sess.conn.disconnect();
        }
        // Nothing presence- or message-shaped may leak across account
        // switches in the same process.
        self.presence.reset();
        self.store.reset();
        self.toggler.reset();
        self.unread_counts.clear();
        self.conv_meta.clear();
        self.last_outgoing_ts = 0;
        if self.state.socket_connected {
            self.state.socket_connected = false;
            self.emit_connection();
        }
    }

    fn register_push_handlers(&self, conn: &mut ConnectionManager) {
        let tx = &self.core_sender;

        conn.subscribe(
            "newMessage",
            typed_handler(tx, "newMessage", |message: MessageDto| {
                SocketEvent::NewMessage { message }
            }),
        );
        conn.subscribe(
            "user:online",
            typed_handler(tx, "user:online", |p: PresencePayload| {
                SocketEvent::UserOnline { user_id: p.user_id }
            }),
        );
        conn.subscribe(
            "user:offline",
            typed_handler(tx, "user:offline", |p: PresencePayload| {
                SocketEvent::UserOffline {
                    user_id: p.user_id,
                    last_seen: p.last_seen.unwrap_or_else(now_seconds),
                }
            }),
        );
        conn.subscribe(
            "online:users",
            typed_handler(tx, "online:users", |user_ids: Vec<String>| {
                SocketEvent::OnlineSnapshot { user_ids }
            }),
        );
        conn.subscribe(
            "typing",
            typed_handler(tx, "typing", |p: TypingPayload| SocketEvent::Typing {
                conversation_id: p.conversation_id,
                user_id: p.user_id,
                is_typing: p.is_typing,
            }),
        );
        conn.subscribe(
            "favoritesUpdated",
            signal_handler(tx, SocketEvent::FavoritesUpdated),
        );
        conn.subscribe(
            "announcementCreated",
            signal_handler(tx, SocketEvent::AnnouncementCreated),
        );
        conn.subscribe(
            "announcementDeleted",
            signal_handler(tx, SocketEvent::AnnouncementDeleted),
        );
    }

    /// Client-initiated typing signal. Keyed by the server conversation id,
    /// the same key message routing uses. Debounce belongs to the caller.
    pub(super) fn emit_typing(&mut self, conversation_id: &str, is_typing: bool) {
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        let user_id = sess.user_id.clone();
        sess.conn.emit(
            "typing",
            serde_json::json!({
                "conversationId": conversation_id,
                "userId": user_id,
                "isTyping": is_typing,
            }),
        );
    }

    pub(super) fn refresh_conversations(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        if !self.network_enabled() {
            let _ = self.core_sender.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationsFetched {
                    conversations: vec![],
                    error: None,
                },
            )));
            return;
        }
        let api = sess.api.clone();
        let user_id = sess.user_id.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let (conversations, error) = match api.fetch_conversations(&user_id).await {
                Ok(list) => (list, None),
                Err(e) => (vec![], Some(e.to_string())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationsFetched {
                    conversations,
                    error,
                },
            )));
        });
    }

    pub(super) fn fetch_messages_task(&mut self, conversation_id: &str) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        if !self.network_enabled() {
            return;
        }
        let api = sess.api.clone();
        let conversation_id = conversation_id.to_string();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let (messages, error) = match api.fetch_messages(&conversation_id).await {
                Ok(list) => (list, None),
                Err(e) => (vec![], Some(e.to_string())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MessagesFetched {
                conversation_id,
                messages,
                error,
            })));
        });
    }

    pub(super) fn send_message_task(
        &mut self,
        conversation_id: &str,
        draft_id: &str,
        outgoing: OutgoingMessage,
    ) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let conversation_id = conversation_id.to_string();
        let draft_id = draft_id.to_string();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let (message, error) = match api.send_message(outgoing).await {
                Ok(m) => (Some(m), None),
                Err(e) => (None, Some(e.to_string())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::SendMessageResult {
                    conversation_id,
                    draft_id,
                    message,
                    error,
                },
            )));
        });
    }

    pub(super) fn toggle_reaction_task(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        emoji: &str,
    ) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let user_id = sess.user_id.clone();
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        let emoji = emoji.to_string();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let (reactions, error) = match api.toggle_reaction(&message_id, &user_id, &emoji).await
            {
                Ok(list) => (Some(list), None),
                Err(e) => (None, Some(e.to_string())),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ReactionToggleResult {
                    conversation_id,
                    message_id,
                    reactions,
                    error,
                },
            )));
        });
    }

    /// Fire-and-forget: a failed mark-read is logged, never surfaced.
    pub(super) fn mark_read_task(&mut self, conversation_id: &str) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        if !self.network_enabled() {
            return;
        }
        let api = sess.api.clone();
        let user_id = sess.user_id.clone();
        let conversation_id = conversation_id.to_string();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let error = api
                .mark_read(&conversation_id, &user_id)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MarkReadResult {
                conversation_id,
                error,
            })));
        });
    }

    pub(super) fn delete_message_task(&mut self, conversation_id: &str, message_id: &str) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let error = api
                .delete_message(&message_id)
                .await
                .err()
                .map(|e| e.to_string());
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::DeleteMessageResult {
                    conversation_id,
                    message_id,
                    error,
                },
            )));
        });
    }
}
