use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bazar_core::{
    ApiError, AppAction, AppReconciler, AppUpdate, AuthState, ChatApi, ChatApp, ConversationDto,
    EventFrame, InboundSink, MessageDeliveryState, MessageDto, OutgoingMessage, ReactionDto,
    SocketHandle, SocketTransport, TransportEvent,
};
use tempfile::tempdir;

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl TestReconciler {
    fn new() -> (Self, Arc<Mutex<Vec<AppUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

#[derive(Default)]
struct SocketInner {
    sinks: Mutex<Vec<InboundSink>>,
    sent: Mutex<Vec<EventFrame>>,
    connects: AtomicU32,
}

/// Scripted socket: the test plays the server role through the inbound sink
/// and observes every outbound frame.
#[derive(Clone, Default)]
struct FakeSocket {
    inner: Arc<SocketInner>,
}

impl FakeSocket {
    fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    fn sink(&self) -> InboundSink {
        self.inner
            .sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("transport not connected yet")
    }

    fn server_connected(&self) {
        (self.sink())(TransportEvent::Connected);
    }

    fn server_disconnected(&self) {
        (self.sink())(TransportEvent::Disconnected);
    }

    fn server_push(&self, event: &str, data: serde_json::Value) {
        (self.sink())(TransportEvent::Frame(EventFrame::new(event, data)));
    }

    fn sent_frames(&self) -> Vec<EventFrame> {
        self.inner.sent.lock().unwrap().clone()
    }
}

struct FakeSocketHandle {
    inner: Arc<SocketInner>,
}

impl SocketHandle for FakeSocketHandle {
    fn send(&self, frame: EventFrame) {
        self.inner.sent.lock().unwrap().push(frame);
    }

    fn close(&self) {}
}

impl SocketTransport for FakeSocket {
    fn connect(&self, _url: &str, inbound: InboundSink) -> anyhow::Result<Arc<dyn SocketHandle>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.sinks.lock().unwrap().push(inbound);
        Ok(Arc::new(FakeSocketHandle {
            inner: self.inner.clone(),
        }))
    }
}

#[derive(Default)]
struct FakeApiInner {
    conversations: Vec<ConversationDto>,
    messages: HashMap<String, Vec<MessageDto>>,
    send_results: VecDeque<Result<MessageDto, u16>>,
    toggle_results: VecDeque<Result<Vec<ReactionDto>, u16>>,
}

#[derive(Clone, Default)]
struct FakeApi {
    inner: Arc<Mutex<FakeApiInner>>,
    hold_sends: Arc<AtomicBool>,
    hold_toggles: Arc<AtomicBool>,
}

impl FakeApi {
    fn with_conversation(self, dto: ConversationDto) -> Self {
        self.inner.lock().unwrap().conversations.push(dto);
        self
    }

    fn put_messages(&self, conversation_id: &str, messages: Vec<MessageDto>) {
        self.inner
            .lock()
            .unwrap()
            .messages
            .insert(conversation_id.to_string(), messages);
    }

    fn queue_send(&self, result: Result<MessageDto, u16>) {
        self.inner.lock().unwrap().send_results.push_back(result);
    }

    fn queue_toggle(&self, result: Result<Vec<ReactionDto>, u16>) {
        self.inner.lock().unwrap().toggle_results.push_back(result);
    }

    async fn wait_while(flag: &AtomicBool) {
        while flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch_conversations(&self, _user_id: &str) -> Result<Vec<ConversationDto>, ApiError> {
        Ok(self.inner.lock().unwrap().conversations.clone())
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<MessageDto>, ApiError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, _outgoing: OutgoingMessage) -> Result<MessageDto, ApiError> {
        Self::wait_while(&self.hold_sends).await;
        let next = self.inner.lock().unwrap().send_results.pop_front();
        match next {
            Some(Ok(dto)) => Ok(dto),
            Some(Err(status)) => Err(ApiError::Status(status)),
            None => Err(ApiError::Status(599)),
        }
    }

    async fn mark_read(&self, _conversation_id: &str, _user_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn toggle_reaction(
        &self,
        _message_id: &str,
        _user_id: &str,
        _emoji: &str,
    ) -> Result<Vec<ReactionDto>, ApiError> {
        Self::wait_while(&self.hold_toggles).await;
        let next = self.inner.lock().unwrap().toggle_results.pop_front();
        match next {
            Some(Ok(list)) => Ok(list),
            Some(Err(status)) => Err(ApiError::Status(status)),
            None => Err(ApiError::Status(599)),
        }
    }

    async fn delete_message(&self, _message_id: &str) -> Result<(), ApiError> {
        Ok(())
    }
}

fn conversation(conversation_id: &str, me: &str, peer: &str, title: &str) -> ConversationDto {
    ConversationDto {
        conversation_id: conversation_id.to_string(),
        participant_ids: vec![me.to_string(), peer.to_string()],
        title: Some(title.to_string()),
        avatar_url: None,
        last_message: None,
    }
}

fn message(id: &str, conversation_id: &str, sender_id: &str, text: &str, at: i64) -> MessageDto {
    MessageDto {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        text: Some(text.to_string()),
        image: None,
        reply_to: None,
        created_at: at.to_string(),
        is_read: false,
        reactions: vec![],
    }
}

fn new_app(
    socket: &FakeSocket,
    api: &FakeApi,
) -> (Arc<ChatApp>, Arc<Mutex<Vec<AppUpdate>>>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let app = ChatApp::new(dir.path().to_string_lossy().to_string());
    app.set_socket_transport_for_tests(Arc::new(socket.clone()));
    app.set_chat_api_for_tests(Arc::new(api.clone()));
    let (reconciler, updates) = TestReconciler::new();
    app.listen_for_updates(Box::new(reconciler));
    (app, updates, dir)
}

fn login_and_connect(app: &ChatApp, socket: &FakeSocket, user_id: &str) {
    app.dispatch(AppAction::Login {
        user_id: user_id.to_string(),
    });
    wait_until("logged in", Duration::from_secs(5), || {
        app.state().auth
            == AuthState::LoggedIn {
                user_id: user_id.to_string(),
            }
    });
    wait_until("transport dialed", Duration::from_secs(5), || {
        socket.connect_count() >= 1
    });
    socket.server_connected();
    wait_until("socket live", Duration::from_secs(5), || {
        app.state().socket_connected
    });
}

#[test]
fn login_joins_socket_and_loads_conversations() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Road bike"));
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");

    wait_until("join announced", Duration::from_secs(5), || {
        socket
            .sent_frames()
            .first()
            .is_some_and(|f| f.event == "join" && f.data == serde_json::json!({ "userId": "u1" }))
    });
    wait_until("conversation list loaded", Duration::from_secs(5), || {
        app.state().conversations.len() == 1
    });
    let state = app.state();
    assert_eq!(state.conversations[0].conversation_id, "c1");
    assert_eq!(state.conversations[0].peer_id, "u2");
    assert_eq!(state.conversations[0].title.as_deref(), Some("Road bike"));
}

#[test]
fn typing_signals_queued_offline_flush_in_order_after_join() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Sofa"));
    let (app, _updates, _dir) = new_app(&socket, &api);

    app.dispatch(AppAction::Login {
        user_id: "u1".to_string(),
    });
    wait_until("transport dialed", Duration::from_secs(5), || {
        socket.connect_count() >= 1
    });

    // The socket has not come up yet; these must queue, not drop.
    app.dispatch(AppAction::SetTyping {
        conversation_id: "c1".to_string(),
        is_typing: true,
    });
    app.dispatch(AppAction::SetTyping {
        conversation_id: "c1".to_string(),
        is_typing: false,
    });
    wait_until("typing actions absorbed", Duration::from_secs(5), || {
        app.state().auth != AuthState::LoggedOut
    });
    assert!(socket.sent_frames().is_empty());

    socket.server_connected();
    wait_until("queued frames flushed", Duration::from_secs(5), || {
        socket.sent_frames().len() == 3
    });
    let frames = socket.sent_frames();
    assert_eq!(frames[0].event, "join");
    assert_eq!(frames[1].event, "typing");
    assert_eq!(frames[1].data["isTyping"], serde_json::json!(true));
    assert_eq!(frames[2].event, "typing");
    assert_eq!(frames[2].data["isTyping"], serde_json::json!(false));
}

#[test]
fn send_message_is_optimistic_then_reconciles_and_dedupes_echo() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Lamp"));
    api.queue_send(Ok(message("m1", "c1", "u1", "hello", 100)));
    api.hold_sends.store(true, Ordering::SeqCst);
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".to_string(),
    });

    app.dispatch(AppAction::SendMessage {
        conversation_id: "c1".to_string(),
        text: Some("hello".to_string()),
        image_base64: None,
        image_mime_type: None,
        reply_to_message_id: None,
    });

    // Exactly one entry, visible immediately, pending until the ack.
    wait_until("draft appended", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.messages.len() == 1)
    });
    let draft = app.state().current_conversation.unwrap().messages[0].clone();
    assert_eq!(draft.delivery, MessageDeliveryState::Pending);
    assert!(draft.is_mine);

    api.hold_sends.store(false, Ordering::SeqCst);
    wait_until("draft reconciled", Duration::from_secs(5), || {
        app.state().current_conversation.is_some_and(|c| {
            c.messages.len() == 1
                && c.messages[0].id == "m1"
                && c.messages[0].delivery == MessageDeliveryState::Sent
        })
    });

    // The relay echoes our own message back; it must not duplicate.
    socket.server_push(
        "newMessage",
        serde_json::to_value(message("m1", "c1", "u1", "hello", 100)).unwrap(),
    );
    socket.server_push(
        "newMessage",
        serde_json::to_value(message("m2", "c1", "u2", "hi!", 101)).unwrap(),
    );
    wait_until("peer reply arrived", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.messages.len() == 2)
    });
    let ids: Vec<String> = app
        .state()
        .current_conversation
        .unwrap()
        .messages
        .iter()
        .map(|m| m.id.clone())
        .collect();
    assert_eq!(ids, vec!["m1".to_string(), "m2".to_string()]);
}

#[test]
fn failed_send_removes_draft_and_toasts() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Desk"));
    api.queue_send(Err(500));
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".to_string(),
    });
    app.dispatch(AppAction::SendMessage {
        conversation_id: "c1".to_string(),
        text: Some("hello".to_string()),
        image_base64: None,
        image_mime_type: None,
        reply_to_message_id: None,
    });

    wait_until("draft removed and toast shown", Duration::from_secs(5), || {
        let state = app.state();
        state.toast.as_deref() == Some("Message not sent")
            && state
                .current_conversation
                .as_ref()
                .is_some_and(|c| c.messages.is_empty())
    });
}

#[test]
fn failed_reaction_toggle_rolls_back_to_baseline() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Skis"));
    api.put_messages("c1", vec![message("m1", "c1", "u2", "still available?", 100)]);
    api.queue_toggle(Err(500));
    api.hold_toggles.store(true, Ordering::SeqCst);
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".to_string(),
    });
    wait_until("messages loaded", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.messages.len() == 1)
    });

    app.dispatch(AppAction::ToggleReaction {
        conversation_id: "c1".to_string(),
        message_id: "m1".to_string(),
        emoji: "👍".to_string(),
    });
    // Optimistic: the reaction shows before the server answers.
    wait_until("optimistic reaction shown", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.messages[0].reactions.len() == 1)
    });

    api.hold_toggles.store(false, Ordering::SeqCst);
    wait_until("reaction rolled back", Duration::from_secs(5), || {
        let state = app.state();
        state.toast.as_deref() == Some("Reaction failed")
            && state
                .current_conversation
                .as_ref()
                .is_some_and(|c| c.messages[0].reactions.is_empty())
    });
}

#[test]
fn successful_toggle_adopts_server_reaction_list() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Table"));
    api.put_messages("c1", vec![message("m1", "c1", "u2", "price?", 100)]);
    api.queue_toggle(Ok(vec![ReactionDto {
        user_id: "u1".to_string(),
        emoji: "👍".to_string(),
        created_at: Some("101".to_string()),
    }]));
    api.queue_toggle(Ok(vec![]));
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".to_string(),
    });
    wait_until("messages loaded", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.messages.len() == 1)
    });

    app.dispatch(AppAction::ToggleReaction {
        conversation_id: "c1".to_string(),
        message_id: "m1".to_string(),
        emoji: "👍".to_string(),
    });
    wait_until("reaction added", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.messages[0].reactions.len() == 1)
    });

    app.dispatch(AppAction::ToggleReaction {
        conversation_id: "c1".to_string(),
        message_id: "m1".to_string(),
        emoji: "👍".to_string(),
    });
    wait_until("reaction removed", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.messages[0].reactions.is_empty())
    });
    assert_eq!(app.state().toast, None);
}

#[test]
fn presence_snapshot_replaces_online_set_after_reconnect() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Kayak"));
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    wait_until("conversation list loaded", Duration::from_secs(5), || {
        app.state().conversations.len() == 1
    });

    socket.server_push("user:online", serde_json::json!({ "userId": "u2" }));
    wait_until("peer online", Duration::from_secs(5), || {
        app.state().conversations[0].peer_online
    });

    // The peer drops while we are disconnected; the rejoin snapshot is the
    // only truth.
    socket.server_disconnected();
    wait_until("socket down", Duration::from_secs(5), || {
        !app.state().socket_connected
    });
    socket.server_connected();
    socket.server_push("online:users", serde_json::json!([]));
    wait_until("peer offline after snapshot", Duration::from_secs(5), || {
        !app.state().conversations[0].peer_online
    });
}

#[test]
fn typing_push_is_hidden_for_offline_users() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Guitar"));
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".to_string(),
    });
    socket.server_push("user:online", serde_json::json!({ "userId": "u2" }));
    socket.server_push(
        "typing",
        serde_json::json!({ "conversationId": "c1", "userId": "u2", "isTyping": true }),
    );
    wait_until("peer typing", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.typing_user_ids == vec!["u2".to_string()])
    });

    // No stop-typing arrives, but the user goes offline; the indicator must
    // not linger.
    socket.server_push(
        "user:offline",
        serde_json::json!({ "userId": "u2", "lastSeen": 123 }),
    );
    wait_until("typing hidden", Duration::from_secs(5), || {
        app.state()
            .current_conversation
            .is_some_and(|c| c.typing_user_ids.is_empty() && c.peer_last_seen == Some(123))
    });
}

#[test]
fn background_push_increments_unread_and_updates_preview() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Heater"));
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    wait_until("conversation list loaded", Duration::from_secs(5), || {
        app.state().conversations.len() == 1
    });

    socket.server_push(
        "newMessage",
        serde_json::to_value(message("m1", "c1", "u2", "is it sold?", 100)).unwrap(),
    );
    wait_until("unread counted", Duration::from_secs(5), || {
        let state = app.state();
        state.conversations[0].unread_count == 1
            && state.conversations[0].last_message.as_deref() == Some("is it sold?")
    });

    app.dispatch(AppAction::MarkConversationRead {
        conversation_id: "c1".to_string(),
    });
    wait_until("unread cleared", Duration::from_secs(5), || {
        app.state().conversations[0].unread_count == 0
    });
}

#[test]
fn favorites_push_surfaces_invalidation_update() {
    let socket = FakeSocket::default();
    let api = FakeApi::default();
    let (app, updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    socket.server_push("favoritesUpdated", serde_json::json!({}));
    wait_until("favorites invalidated", Duration::from_secs(5), || {
        updates
            .lock()
            .unwrap()
            .iter()
            .any(|u| matches!(u, AppUpdate::FavoritesInvalidated { .. }))
    });
}

#[test]
fn logout_resets_everything() {
    let socket = FakeSocket::default();
    let api = FakeApi::default().with_conversation(conversation("c1", "u1", "u2", "Tent"));
    let (app, _updates, _dir) = new_app(&socket, &api);

    login_and_connect(&app, &socket, "u1");
    app.dispatch(AppAction::OpenConversation {
        conversation_id: "c1".to_string(),
    });
    socket.server_push("user:online", serde_json::json!({ "userId": "u2" }));
    wait_until("conversation open", Duration::from_secs(5), || {
        app.state().current_conversation.is_some()
    });

    app.dispatch(AppAction::Logout);
    wait_until("logged out", Duration::from_secs(5), || {
        let state = app.state();
        state.auth == AuthState::LoggedOut
            && state.current_conversation.is_none()
            && state.conversations.is_empty()
            && !state.socket_connected
    });
}
