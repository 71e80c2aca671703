//! Socket collaborator boundary.
//!
//! The wire protocol is a stream of JSON event frames (`{event, data}`) over
//! a single websocket. `SocketTransport` is the seam the ConnectionManager is
//! injected with, so tests can substitute a scripted fake; `WsTransport` is
//! the production implementation with automatic reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Frame(EventFrame),
}

pub type InboundSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

pub trait SocketHandle: Send + Sync {
    /// Best-effort: frames handed over while the socket is down are dropped.
    /// Queueing-until-live is the ConnectionManager's contract, not the
    /// transport's.
    fn send(&self, frame: EventFrame);
    fn close(&self);
}

pub trait SocketTransport: Send + Sync {
    fn connect(&self, url: &str, inbound: InboundSink) -> anyhow::Result<Arc<dyn SocketHandle>>;
}

pub struct WsTransport {
    runtime: tokio::runtime::Handle,
}

impl WsTransport {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }
}

struct WsHandle {
    outbound: flume::Sender<EventFrame>,
    alive: Arc<AtomicBool>,
}

impl SocketHandle for WsHandle {
    fn send(&self, frame: EventFrame) {
        let _ = self.outbound.send(frame);
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl SocketTransport for WsTransport {
    fn connect(&self, url: &str, inbound: InboundSink) -> anyhow::Result<Arc<dyn SocketHandle>> {
        let (outbound_tx, outbound_rx) = flume::unbounded::<EventFrame>();
        let alive = Arc::new(AtomicBool::new(true));
        let url = url.to_string();
        let task_alive = alive.clone();

        // Supervisor: dial, pump frames both ways, and on any drop retry with
        // bounded backoff until the handle is closed. Drops are reported as
        // `Disconnected` and otherwise silent; callers self-heal via the
        // post-reconnect join/snapshot flow.
        self.runtime.spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if !task_alive.load(Ordering::SeqCst) {
                    return;
                }
                match connect_async(url.as_str()).await {
                    Ok((stream, _)) => {
                        attempt = 0;
                        inbound(TransportEvent::Connected);
                        let (mut write, mut read) = stream.split();
                        loop {
                            if !task_alive.load(Ordering::SeqCst) {
                                let _ = write.close().await;
                                return;
                            }
                            tokio::select! {
                                frame = outbound_rx.recv_async() => {
                                    let Ok(frame) = frame else { return };
                                    let Ok(text) = serde_json::to_string(&frame) else { continue };
                                    if write.send(WsMessage::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                msg = read.next() => {
                                    match msg {
                                        Some(Ok(WsMessage::Text(text))) => {
                                            match serde_json::from_str::<EventFrame>(text.as_str()) {
                                                Ok(frame) => inbound(TransportEvent::Frame(frame)),
                                                Err(e) => {
                                                    tracing::debug!(%e, "unparseable socket frame");
                                                }
                                            }
                                        }
                                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                                        Some(Ok(_)) => {}
                                        Some(Err(_)) | None => break,
                                    }
                                }
                            }
                        }
                        inbound(TransportEvent::Disconnected);
                    }
                    Err(e) => {
                        tracing::debug!(%e, "socket dial failed");
                    }
                }
                if !task_alive.load(Ordering::SeqCst) {
                    return;
                }
                // Backoff: 250ms, 500ms, 1s, 2s, 4s (bounded).
                let delay_ms = 250u64.saturating_mul(1u64 << attempt.min(4));
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        });

        Ok(Arc::new(WsHandle {
            outbound: outbound_tx,
            alive,
        }))
    }
}
