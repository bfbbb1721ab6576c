//! Connected HMR clients.
//!
//! Each client owns an unbounded channel, so a broadcast never waits on a
//! slow reader. Senders whose receiver is gone are pruned on the next
//! broadcast. While the last compile is failing its error message is kept
//! and replayed to clients that connect afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use fob_protocol::HmrMessage;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Default)]
struct Registry {
    senders: HashMap<usize, UnboundedSender<String>>,
    pending_error: Option<String>,
}

#[derive(Default)]
pub struct ClientRegistry {
    inner: RwLock<Registry>,
    next_id: AtomicUsize,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client.
    ///
    /// # Returns
    ///
    /// Client ID and receiver for serialized [`HmrMessage`]s
    pub fn register(&self) -> (usize, UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut registry = self.inner.write();
        if let Some(error) = &registry.pending_error {
            let _ = tx.send(error.clone());
        }
        registry.senders.insert(id, tx);

        debug!(client = id, "HMR client connected");
        (id, rx)
    }

    pub fn unregister(&self, id: usize) {
        if self.inner.write().senders.remove(&id).is_some() {
            debug!(client = id, "HMR client disconnected");
        }
    }

    /// Send a message to every connected client.
    ///
    /// Returns the number of clients the message was queued for.
    pub fn broadcast(&self, message: &HmrMessage) -> usize {
        let json = message.to_json().unwrap_or_else(|_| "{}".to_string());

        let mut registry = self.inner.write();
        if message.is_error() {
            registry.pending_error = Some(json.clone());
        }

        let mut failed_ids = Vec::new();
        for (id, tx) in &registry.senders {
            if tx.send(json.clone()).is_err() {
                failed_ids.push(*id);
            }
        }

        for id in &failed_ids {
            registry.senders.remove(id);
        }
        if !failed_ids.is_empty() {
            debug!(pruned = failed_ids.len(), "removed disconnected HMR clients");
        }

        registry.senders.len()
    }

    /// Forget the error replayed to new clients.
    pub fn clear_error(&self) {
        self.inner.write().pending_error = None;
    }

    /// Serialized error message new clients receive on connect.
    pub fn pending_error(&self) -> Option<String> {
        self.inner.read().pending_error.clone()
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().senders.len()
    }
}
