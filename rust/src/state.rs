#[derive(uniffi::Record, Clone, Debug)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub socket_connected: bool,
    pub conversations: Vec<ConversationSummary>,
    pub current_conversation: Option<ConversationViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::LoggedOut,
            socket_connected: false,
            conversations: vec![],
            current_conversation: None,
            toast: None,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { user_id: String },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub peer_id: String,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub unread_count: u32,
    pub peer_online: bool,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ConversationViewState {
    pub conversation_id: String,
    pub peer_id: String,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub peer_online: bool,
    pub peer_last_seen: Option<i64>,
    /// Peers currently typing here, already filtered through the online set:
    /// a user the server says is offline is never rendered as typing.
    pub typing_user_ids: Vec<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub reply_to_message_id: Option<String>,
    pub timestamp: i64,
    pub is_read: bool,
    pub is_mine: bool,
    pub delivery: MessageDeliveryState,
    pub reactions: Vec<ReactionEntry>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ReactionEntry {
    pub user_id: String,
    pub emoji: String,
    pub created_at: i64,
}

/// Delivery state of a message as the UI should render it. `Pending` covers
/// exactly the window between the optimistic insert and the server ack; a
/// failed send removes the entry instead of parking it in a failed state.
#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
}

pub fn now_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
