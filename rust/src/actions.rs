#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Auth
    Login {
        user_id: String,
    },
    Logout,

    // Conversations
    RefreshConversations,
    OpenConversation {
        conversation_id: String,
    },
    CloseConversation,
    MarkConversationRead {
        conversation_id: String,
    },

    // Messaging
    SendMessage {
        conversation_id: String,
        text: Option<String>,
        image_base64: Option<String>,
        image_mime_type: Option<String>,
        reply_to_message_id: Option<String>,
    },
    DeleteMessage {
        conversation_id: String,
        message_id: String,
    },
    SetTyping {
        conversation_id: String,
        is_typing: bool,
    },
    ToggleReaction {
        conversation_id: String,
        message_id: String,
        emoji: String,
    },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message bodies or attachments).
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::Login { .. } => "Login",
            AppAction::Logout => "Logout",

            // Conversations
            AppAction::RefreshConversations => "RefreshConversations",
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::MarkConversationRead { .. } => "MarkConversationRead",

            // Messaging
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::DeleteMessage { .. } => "DeleteMessage",
            AppAction::SetTyping { .. } => "SetTyping",
            AppAction::ToggleReaction { .. } => "ToggleReaction",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
