//! One persistent socket per authenticated identity.
//!
//! While disconnected, `subscribe` and `emit` never fail; they land in one
//! ordered pending-operation list that is drained exactly once per connect:
//! subscriptions attach first, then the join signal goes out, then queued
//! emits flush in FIFO order. Handlers attached before a disconnect survive
//! it and simply stop firing until the next connect.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::transport::{EventFrame, InboundSink, SocketHandle, SocketTransport};

pub(crate) type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandlerId(u64);

enum PendingOp {
    Subscribe {
        event: String,
        id: u64,
        handler: EventHandler,
    },
    Emit {
        frame: EventFrame,
    },
}

pub(crate) struct ConnectionManager {
    transport: Arc<dyn SocketTransport>,
    socket_url: String,
    inbound: InboundSink,

    identity: Option<String>,
    live: bool,
    handle: Option<Arc<dyn SocketHandle>>,

    handlers: HashMap<String, Vec<(u64, EventHandler)>>,
    pending: Vec<PendingOp>,
    next_handler_id: u64,
}

impl ConnectionManager {
    pub(crate) fn new(
        transport: Arc<dyn SocketTransport>,
        socket_url: String,
        inbound: InboundSink,
    ) -> Self {
        Self {
            transport,
            socket_url,
            inbound,
            identity: None,
            live: false,
            handle: None,
            handlers: HashMap::new(),
            pending: Vec::new(),
            next_handler_id: 0,
        }
    }

    /// Idempotent per identity; a different identity tears the old
    /// connection down first.
    pub(crate) fn connect(&mut self, identity: &str) -> anyhow::Result<()> {
        if self.handle.is_some() && self.identity.as_deref() == Some(identity) {
            return Ok(());
        }
        if self.handle.is_some() {
            self.disconnect();
        }
        let handle = self.transport.connect(&self.socket_url, self.inbound.clone())?;
        self.handle = Some(handle);
        self.identity = Some(identity.to_string());
        Ok(())
    }

    /// Drops the socket and discards (does not flush) the pending queue.
    /// Already-attached handlers are retained; they stop firing.
    pub(crate) fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        self.live = false;
        self.identity = None;
        self.pending.clear();
    }

    pub(crate) fn subscribe(&mut self, event: &str, handler: EventHandler) -> HandlerId {
        let id = self.next_handler_id;
        self.next_handler_id += 1;
        if self.live {
            self.handlers
                .entry(event.to_string())
                .or_default()
                .push((id, handler));
        } else {
            self.pending.push(PendingOp::Subscribe {
                event: event.to_string(),
                id,
                handler,
            });
        }
        HandlerId(id)
    }

    pub(crate) fn unsubscribe(&mut self, id: HandlerId) {
        for list in self.handlers.values_mut() {
            list.retain(|(hid, _)| *hid != id.0);
        }
        self.pending.retain(|op| match op {
            PendingOp::Subscribe { id: pid, .. } => *pid != id.0,
            PendingOp::Emit { .. } => true,
        });
    }

    pub(crate) fn emit(&mut self, event: &str, data: Value) {
        let frame = EventFrame::new(event, data);
        if self.live {
            if let Some(handle) = &self.handle {
                handle.send(frame);
            }
        } else {
            self.pending.push(PendingOp::Emit { frame });
        }
    }

    /// Transport reported a live socket (initial connect or reconnect).
    pub(crate) fn on_transport_connected(&mut self) {
        self.live = true;

        // Attach queued subscriptions before anything is emitted, so a
        // subscribe-then-emit sequence issued while offline still observes
        // the responses to its own emits.
        let pending = std::mem::take(&mut self.pending);
        let mut emits: Vec<EventFrame> = Vec::new();
        for op in pending {
            match op {
                PendingOp::Subscribe { event, id, handler } => {
                    self.handlers.entry(event).or_default().push((id, handler));
                }
                PendingOp::Emit { frame } => emits.push(frame),
            }
        }

        let Some(handle) = self.handle.clone() else {
            return;
        };
        // Join first: it is what lets the server route pushes to this
        // connection, so it must precede any queued emit.
        if let Some(identity) = &self.identity {
            handle.send(EventFrame::new(
                "join",
                serde_json::json!({ "userId": identity }),
            ));
        }
        for frame in emits {
            handle.send(frame);
        }
    }

    pub(crate) fn on_transport_disconnected(&mut self) {
        // Silent by contract; the transport self-heals.
        self.live = false;
    }

    pub(crate) fn dispatch(&self, frame: &EventFrame) {
        let Some(list) = self.handlers.get(&frame.event) else {
            tracing::trace!(event = %frame.event, "push with no subscribers");
            return;
        };
        for (_, handler) in list {
            handler(frame.data.clone());
        }
    }
}
