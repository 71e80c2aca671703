mod config;
mod connection;
mod messages;
mod presence;
mod reactions;
mod session;
mod view;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use base64::Engine as _;
use flume::Sender;
use uuid::Uuid;

use crate::actions::AppAction;
use crate::api::{epoch_seconds, ChatApi, HttpChatApi, ImageAttachment, MessageDto, OutgoingMessage, ReactionDto};
use crate::state::{
    now_seconds, AuthState, ChatMessage, ConversationSummary, ConversationViewState,
    MessageDeliveryState, ReactionEntry,
};
use crate::transport::SocketTransport;
use crate::updates::{AppUpdate, CoreMsg, InternalEvent, SocketEvent};

use connection::ConnectionManager;
use messages::{MessageStore, StoredMessage};
use presence::PresenceTracker;
use reactions::ReactionToggler;
use session::Session;

pub(crate) type SharedTransportOverride = Arc<RwLock<Option<Arc<dyn SocketTransport>>>>;
pub(crate) type SharedApiOverride = Arc<RwLock<Option<Arc<dyn ChatApi>>>>;

/// Fetched conversation metadata, kept separate from the rendered summaries
/// so previews can be recomputed from the live message logs.
#[derive(Debug, Clone)]
struct ConversationMeta {
    conversation_id: String,
    peer_id: String,
    title: Option<String>,
    avatar_url: Option<String>,
    last_message: Option<String>,
    last_message_at: Option<i64>,
}

pub struct AppCore {
    pub state: crate::state::AppState,
    rev: u64,
    last_outgoing_ts: i64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<crate::state::AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    session: Option<Session>,

    presence: PresenceTracker,
    store: MessageStore,
    toggler: ReactionToggler,

    unread_counts: HashMap<String, u32>,
    conv_meta: HashMap<String, ConversationMeta>,

    // Test seams: installed before Login is dispatched, read at session start.
    transport_override: SharedTransportOverride,
    api_override: SharedApiOverride,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<crate::state::AppState>>,
        transport_override: SharedTransportOverride,
        api_override: SharedApiOverride,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = crate::state::AppState::empty();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state,
            rev: 0,
            last_outgoing_ts: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            session: None,
            presence: PresenceTracker::new(),
            store: MessageStore::new(),
            toggler: ReactionToggler::new(),
            unread_counts: HashMap::new(),
            conv_meta: HashMap::new(),
            transport_override,
            api_override,
        };

        // Ensure ChatApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn transport_override(&self) -> Option<Arc<dyn SocketTransport>> {
        match self.transport_override.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn api_override(&self) -> Option<Arc<dyn ChatApi>> {
        match self.api_override.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &crate::state::AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn commit(&mut self) -> u64 {
        let rev = self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        rev
    }

    fn emit_auth(&mut self) {
        let rev = self.commit();
        let _ = self.update_sender.send(AppUpdate::AuthChanged {
            rev,
            auth: self.state.auth.clone(),
        });
    }

    fn emit_connection(&mut self) {
        let rev = self.commit();
        let _ = self.update_sender.send(AppUpdate::ConnectionChanged {
            rev,
            socket_connected: self.state.socket_connected,
        });
    }

    fn emit_conversation_list(&mut self) {
        let rev = self.commit();
        let _ = self.update_sender.send(AppUpdate::ConversationListChanged {
            rev,
            conversations: self.state.conversations.clone(),
        });
    }

    fn emit_current_conversation(&mut self) {
        let rev = self.commit();
        let _ = self
            .update_sender
            .send(AppUpdate::CurrentConversationChanged {
                rev,
                current_conversation: self.state.current_conversation.clone(),
            });
    }

    fn emit_toast(&mut self) {
        let rev = self.commit();
        let _ = self.update_sender.send(AppUpdate::ToastChanged {
            rev,
            toast: self.state.toast.clone(),
        });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it. This makes
        // the UX robust to rev-gap resyncs (state() still carries the toast).
        self.state.toast = Some(msg.into());
        self.emit_toast();
    }

    fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn handle_auth_transition(&mut self, logged_in: bool) {
        self.state.conversations = vec![];
        self.state.current_conversation = None;
        if !logged_in {
            self.state.toast = None;
            self.emit_toast();
        }
        self.emit_conversation_list();
        self.emit_current_conversation();
    }

    fn stored_from_dto(&self, dto: &MessageDto) -> StoredMessage {
        StoredMessage {
            id: dto.id.clone(),
            sender_id: dto.sender_id.clone(),
            text: dto.text.clone(),
            image_url: dto.image.clone(),
            reply_to: dto.reply_to.clone(),
            created_at: dto.created_at_epoch(),
            is_read: dto.is_read,
            is_draft: false,
            reactions: dto.reactions.iter().map(reaction_entry).collect(),
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::Login { user_id } => {
                let user_id = user_id.trim().to_string();
                if user_id.is_empty() {
                    self.toast("Enter a user id");
                    return;
                }
                if let Err(e) = self.start_session(&user_id) {
                    self.toast(format!("Login failed: {e:#}"));
                }
            }
            AppAction::Logout => {
                self.stop_session();
                self.state.auth = AuthState::LoggedOut;
                self.emit_auth();
                self.handle_auth_transition(false);
            }
            AppAction::RefreshConversations => {
                if !self.is_logged_in() {
                    return;
                }
                self.refresh_conversations();
            }
            AppAction::OpenConversation { conversation_id } => {
                if !self.is_logged_in() {
                    self.toast("Please log in first");
                    return;
                }
                self.unread_counts.insert(conversation_id.clone(), 0);
                self.store.mark_read(&conversation_id);
                // Seed the slot so the projection knows which log to render;
                // metadata fills in once the fetch lands.
                self.state.current_conversation = Some(ConversationViewState {
                    conversation_id: conversation_id.clone(),
                    peer_id: String::new(),
                    title: None,
                    avatar_url: None,
                    messages: vec![],
                    peer_online: false,
                    peer_last_seen: None,
                    typing_user_ids: vec![],
                });
                self.refresh_current_conversation();
                self.refresh_conversation_list();
                self.mark_read_task(&conversation_id);
                self.fetch_messages_task(&conversation_id);
            }
            AppAction::CloseConversation => {
                let Some(conversation_id) = self.open_conversation_id() else {
                    return;
                };
                // Our own typing indicator must not outlive the screen.
                self.emit_typing(&conversation_id, false);
                self.presence.clear_typing(&conversation_id);
                self.state.current_conversation = None;
                self.emit_current_conversation();
            }
            AppAction::MarkConversationRead { conversation_id } => {
                if !self.is_logged_in() {
                    return;
                }
                self.unread_counts.insert(conversation_id.clone(), 0);
                self.store.mark_read(&conversation_id);
                self.refresh_conversation_list();
                self.refresh_current_if_open(&conversation_id);
                self.mark_read_task(&conversation_id);
            }
            AppAction::SendMessage {
                conversation_id,
                text,
                image_base64,
                image_mime_type,
                reply_to_message_id,
            } => {
                if !self.is_logged_in() {
                    self.toast("Please log in first");
                    return;
                }
                let text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
                let image = match image_base64 {
                    Some(b64) => {
                        match base64::engine::general_purpose::STANDARD.decode(b64.as_bytes()) {
                            Ok(bytes) => Some(ImageAttachment {
                                bytes,
                                mime_type: image_mime_type
                                    .unwrap_or_else(|| "image/jpeg".to_string()),
                            }),
                            Err(e) => {
                                tracing::warn!(%e, "image decode failed");
                                self.toast("Invalid image data");
                                return;
                            }
                        }
                    }
                    None => None,
                };
                if text.is_none() && image.is_none() {
                    return;
                }

                // Server timestamps are second-granularity; rapid sends can
                // share a second. Keep local draft timestamps monotonic so
                // ordering stays deterministic.
                let ts = {
                    let now = now_seconds();
                    if now <= self.last_outgoing_ts {
                        self.last_outgoing_ts += 1;
                    } else {
                        self.last_outgoing_ts = now;
                    }
                    self.last_outgoing_ts
                };

                let draft_id = format!("draft-{}", Uuid::new_v4());
                let sender_id = self.own_user_id().unwrap_or_default();
                self.store.append_draft(
                    &conversation_id,
                    StoredMessage {
                        id: draft_id.clone(),
                        sender_id,
                        text: text.clone(),
                        image_url: None,
                        reply_to: reply_to_message_id.clone(),
                        created_at: ts,
                        is_read: false,
                        is_draft: true,
                        reactions: vec![],
                    },
                );
                self.refresh_current_if_open(&conversation_id);
                self.refresh_conversation_list();

                if !self.network_enabled() {
                    // Deterministic tests: treat as immediate success.
                    let canonical = MessageDto {
                        id: draft_id.replacen("draft-", "local-", 1),
                        conversation_id: conversation_id.clone(),
                        sender_id: self.own_user_id().unwrap_or_default(),
                        text,
                        image: None,
                        reply_to: reply_to_message_id,
                        created_at: ts.to_string(),
                        is_read: false,
                        reactions: vec![],
                    };
                    let _ = self.core_sender.send(CoreMsg::Internal(Box::new(
                        InternalEvent::SendMessageResult {
                            conversation_id,
                            draft_id,
                            message: Some(canonical),
                            error: None,
                        },
                    )));
                    return;
                }

                let outgoing = OutgoingMessage {
                    conversation_id: conversation_id.clone(),
                    text,
                    image,
                    reply_to: reply_to_message_id,
                };
                self.send_message_task(&conversation_id, &draft_id, outgoing);
            }
            AppAction::DeleteMessage {
                conversation_id,
                message_id,
            } => {
                if !self.is_logged_in() {
                    return;
                }
                // Optimistic removal; a failed delete refetches the log.
                if !self.store.remove(&conversation_id, &message_id) {
                    return;
                }
                self.refresh_current_if_open(&conversation_id);
                self.refresh_conversation_list();
                self.delete_message_task(&conversation_id, &message_id);
            }
            AppAction::SetTyping {
                conversation_id,
                is_typing,
            } => {
                if !self.is_logged_in() {
                    return;
                }
                self.emit_typing(&conversation_id, is_typing);
            }
            AppAction::ToggleReaction {
                conversation_id,
                message_id,
                emoji,
            } => {
                if !self.is_logged_in() {
                    return;
                }
                let Some(current) = self.store.reactions_of(&conversation_id, &message_id) else {
                    return;
                };
                let me = self.own_user_id().unwrap_or_default();
                self.toggler.begin(&message_id, &current);
                let next = ReactionToggler::toggled(&current, &me, &emoji, now_seconds());
                self.store.set_reactions(&conversation_id, &message_id, next);
                self.refresh_current_if_open(&conversation_id);
                self.toggle_reaction_task(&conversation_id, &message_id, &emoji);
            }
            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_toast();
                }
            }
            AppAction::Foregrounded => {
                // Native sends lifecycle signals as actions; Rust owns all
                // state changes.
                if !self.is_logged_in() {
                    return;
                }
                self.refresh_conversations();
                if let Some(conversation_id) = self.open_conversation_id() {
                    self.fetch_messages_task(&conversation_id);
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::SocketConnected => {
                if let Some(sess) = self.session.as_mut() {
                    sess.conn.on_transport_connected();
                }
                if !self.state.socket_connected {
                    self.state.socket_connected = true;
                    self.emit_connection();
                }
            }
            InternalEvent::SocketDisconnected => {
                if let Some(sess) = self.session.as_mut() {
                    sess.conn.on_transport_disconnected();
                }
                if self.state.socket_connected {
                    self.state.socket_connected = false;
                    self.emit_connection();
                }
            }
            InternalEvent::SocketFrame { frame } => {
                if let Some(sess) = self.session.as_ref() {
                    sess.conn.dispatch(&frame);
                }
            }
            InternalEvent::Push { event } => self.handle_push(event),
            InternalEvent::ConversationsFetched {
                conversations,
                error,
            } => {
                if let Some(err) = error {
                    tracing::warn!(%err, "conversations fetch failed");
                    self.toast("Could not load conversations");
                    return;
                }
                let me = self.own_user_id().unwrap_or_default();
                self.conv_meta = conversations
                    .into_iter()
                    .map(|dto| {
                        let peer_id = dto
                            .participant_ids
                            .iter()
                            .find(|p| **p != me)
                            .cloned()
                            .unwrap_or_default();
                        let meta = ConversationMeta {
                            conversation_id: dto.conversation_id.clone(),
                            peer_id,
                            title: dto.title,
                            avatar_url: dto.avatar_url,
                            last_message: dto.last_message.as_ref().and_then(|m| m.text.clone()),
                            last_message_at: dto.last_message.as_ref().map(|m| m.created_at_epoch()),
                        };
                        (dto.conversation_id, meta)
                    })
                    .collect();
                self.refresh_conversation_list();
                self.refresh_current_conversation();
            }
            InternalEvent::MessagesFetched {
                conversation_id,
                messages,
                error,
            } => {
                if let Some(err) = error {
                    tracing::warn!(%err, %conversation_id, "messages fetch failed");
                    self.toast("Could not load messages");
                    return;
                }
                let stored: Vec<StoredMessage> =
                    messages.iter().map(|m| self.stored_from_dto(m)).collect();
                self.store.replace_all(&conversation_id, stored);
                self.refresh_current_if_open(&conversation_id);
                self.refresh_conversation_list();
            }
            InternalEvent::SendMessageResult {
                conversation_id,
                draft_id,
                message,
                error,
            } => match message {
                Some(dto) => {
                    let canonical = self.stored_from_dto(&dto);
                    self.store.reconcile(&conversation_id, &draft_id, canonical);
                    self.refresh_current_if_open(&conversation_id);
                    self.refresh_conversation_list();
                }
                None => {
                    tracing::warn!(?error, %conversation_id, "send failed");
                    self.store.remove(&conversation_id, &draft_id);
                    self.refresh_current_if_open(&conversation_id);
                    self.refresh_conversation_list();
                    self.toast("Message not sent");
                }
            },
            InternalEvent::ReactionToggleResult {
                conversation_id,
                message_id,
                reactions,
                error,
            } => {
                match reactions {
                    Some(list) => {
                        self.toggler.complete_ok(&message_id);
                        let entries: Vec<ReactionEntry> =
                            list.iter().map(reaction_entry).collect();
                        self.store
                            .set_reactions(&conversation_id, &message_id, entries);
                    }
                    None => {
                        tracing::warn!(?error, %message_id, "reaction toggle failed");
                        if let Some(baseline) = self.toggler.complete_err(&message_id) {
                            self.store
                                .set_reactions(&conversation_id, &message_id, baseline);
                        }
                        self.toast("Reaction failed");
                    }
                }
                self.refresh_current_if_open(&conversation_id);
            }
            InternalEvent::MarkReadResult {
                conversation_id,
                error,
            } => {
                if let Some(err) = error {
                    tracing::debug!(%err, %conversation_id, "mark read failed");
                }
            }
            InternalEvent::DeleteMessageResult {
                conversation_id,
                message_id,
                error,
            } => {
                if let Some(err) = error {
                    tracing::warn!(%err, %message_id, "delete failed");
                    self.toast("Could not delete message");
                    // Refetch to restore the optimistically removed entry.
                    self.fetch_messages_task(&conversation_id);
                }
            }
            InternalEvent::Toast(msg) => {
                tracing::info!(%msg, "toast");
                self.toast(msg);
            }
        }
    }

    fn handle_push(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::NewMessage { message } => {
                let conversation_id = message.conversation_id.clone();
                let known = self.conv_meta.contains_key(&conversation_id);
                let stored = self.stored_from_dto(&message);
                let sender_id = stored.sender_id.clone();
                if !self.store.on_push(&conversation_id, stored) {
                    return;
                }
                let me = self.own_user_id().unwrap_or_default();
                let open = self.open_conversation_id().as_deref() == Some(conversation_id.as_str());
                if open {
                    self.store.mark_read(&conversation_id);
                    self.mark_read_task(&conversation_id);
                } else if sender_id != me {
                    *self.unread_counts.entry(conversation_id.clone()).or_insert(0) += 1;
                }
                if !known {
                    // First message of a brand-new conversation: the metadata
                    // lives server-side only.
                    self.refresh_conversations();
                }
                self.refresh_conversation_list();
                self.refresh_current_if_open(&conversation_id);
            }
            SocketEvent::UserOnline { user_id } => {
                self.presence.on_online(&user_id);
                self.refresh_conversation_list();
                self.refresh_current_conversation();
            }
            SocketEvent::UserOffline { user_id, last_seen } => {
                self.presence.on_offline(&user_id, last_seen);
                self.refresh_conversation_list();
                self.refresh_current_conversation();
            }
            SocketEvent::OnlineSnapshot { user_ids } => {
                self.presence.on_snapshot(user_ids);
                self.refresh_conversation_list();
                self.refresh_current_conversation();
            }
            SocketEvent::Typing {
                conversation_id,
                user_id,
                is_typing,
            } => {
                if self.own_user_id().as_deref() == Some(user_id.as_str()) {
                    return;
                }
                self.presence.on_typing(&conversation_id, &user_id, is_typing);
                self.refresh_current_if_open(&conversation_id);
            }
            SocketEvent::FavoritesUpdated => {
                let rev = self.commit();
                let _ = self
                    .update_sender
                    .send(AppUpdate::FavoritesInvalidated { rev });
            }
            SocketEvent::AnnouncementCreated | SocketEvent::AnnouncementDeleted => {
                let rev = self.commit();
                let _ = self
                    .update_sender
                    .send(AppUpdate::ListingsInvalidated { rev });
            }
        }
    }
}

fn reaction_entry(dto: &ReactionDto) -> ReactionEntry {
    ReactionEntry {
        user_id: dto.user_id.clone(),
        emoji: dto.emoji.clone(),
        created_at: dto
            .created_at
            .as_deref()
            .map(epoch_seconds)
            .unwrap_or(0),
    }
}
