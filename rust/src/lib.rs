mod actions;
mod api;
mod core;
mod logging;
mod state;
mod transport;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

use crate::core::{SharedApiOverride, SharedTransportOverride};

pub use actions::AppAction;
pub use api::*;
pub use state::*;
pub use transport::{EventFrame, InboundSink, SocketHandle, SocketTransport, TransportEvent};
pub use updates::*;

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

#[derive(uniffi::Object)]
pub struct ChatApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    transport_override: SharedTransportOverride,
    api_override: SharedApiOverride,
}

#[uniffi::export]
impl ChatApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "ChatApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let transport_override: SharedTransportOverride = Arc::new(RwLock::new(None));
        let api_override: SharedApiOverride = Arc::new(RwLock::new(None));

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let transport_for_core = transport_override.clone();
        let api_for_core = api_override.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                transport_for_core,
                api_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            transport_override,
            api_override,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        // Seed the listener with the current snapshot so it never has to
        // wait for the next delta.
        reconciler.reconcile(AppUpdate::FullState(self.state()));

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl ChatApp {
    pub fn set_socket_transport_for_tests(&self, transport: Arc<dyn SocketTransport>) {
        match self.transport_override.write() {
            Ok(mut slot) => {
                *slot = Some(transport);
            }
            Err(poison) => {
                *poison.into_inner() = Some(transport);
            }
        }
    }

    pub fn set_chat_api_for_tests(&self, api: Arc<dyn ChatApi>) {
        match self.api_override.write() {
            Ok(mut slot) => {
                *slot = Some(api);
            }
            Err(poison) => {
                *poison.into_inner() = Some(api);
            }
        }
    }
}
