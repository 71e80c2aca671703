use crate::api::{ConversationDto, MessageDto, ReactionDto};
use crate::state::{AppState, AuthState, ConversationSummary, ConversationViewState};
use crate::transport::EventFrame;
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    AuthChanged {
        rev: u64,
        auth: AuthState,
    },
    ConnectionChanged {
        rev: u64,
        socket_connected: bool,
    },
    ConversationListChanged {
        rev: u64,
        conversations: Vec<ConversationSummary>,
    },
    CurrentConversationChanged {
        rev: u64,
        current_conversation: Option<ConversationViewState>,
    },
    ToastChanged {
        rev: u64,
        toast: Option<String>,
    },
    /// The favorites list changed server-side; the (out-of-scope) favorites
    /// screen should refetch.
    FavoritesInvalidated {
        rev: u64,
    },
    /// A listing was created or deleted server-side; listing feeds should
    /// refetch.
    ListingsInvalidated {
        rev: u64,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::AuthChanged { rev, .. } => *rev,
            AppUpdate::ConnectionChanged { rev, .. } => *rev,
            AppUpdate::ConversationListChanged { rev, .. } => *rev,
            AppUpdate::CurrentConversationChanged { rev, .. } => *rev,
            AppUpdate::ToastChanged { rev, .. } => *rev,
            AppUpdate::FavoritesInvalidated { rev } => *rev,
            AppUpdate::ListingsInvalidated { rev } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Inbound socket pushes after decoding, routed into the actor by the
/// session layer's subscribed handlers.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    NewMessage {
        message: MessageDto,
    },
    UserOnline {
        user_id: String,
    },
    UserOffline {
        user_id: String,
        last_seen: i64,
    },
    /// Full replacement of the online set, sent by the server after a
    /// (re)join. Incremental deltas may have been missed while disconnected.
    OnlineSnapshot {
        user_ids: Vec<String>,
    },
    Typing {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    FavoritesUpdated,
    AnnouncementCreated,
    AnnouncementDeleted,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Socket plumbing
    SocketConnected,
    SocketDisconnected,
    SocketFrame {
        frame: EventFrame,
    },
    Push {
        event: SocketEvent,
    },

    // Async REST results
    ConversationsFetched {
        conversations: Vec<ConversationDto>,
        error: Option<String>,
    },
    MessagesFetched {
        conversation_id: String,
        messages: Vec<MessageDto>,
        error: Option<String>,
    },
    SendMessageResult {
        conversation_id: String,
        draft_id: String,
        message: Option<MessageDto>,
        error: Option<String>,
    },
    ReactionToggleResult {
        conversation_id: String,
        message_id: String,
        reactions: Option<Vec<ReactionDto>>,
        error: Option<String>,
    },
    MarkReadResult {
        conversation_id: String,
        error: Option<String>,
    },
    DeleteMessageResult {
        conversation_id: String,
        message_id: String,
        error: Option<String>,
    },
    Toast(String),
}
