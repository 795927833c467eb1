//! Connection registry for the game server
//!
//! This module tracks every live client connection:
//! - Per-connection handles carrying identity, display name, score, and the
//!   outbound message queue
//! - Registration and removal over the connection lifecycle
//! - Broadcasts to all connected clients or an explicit subset
//!
//! Broadcasts always iterate a point-in-time snapshot of the handle set, so
//! a client disconnecting mid-broadcast cannot disturb delivery to the rest.

use log::{error, info};
use shared::{PlayerInfo, ServerMessage};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Shared handle for one connected client.
///
/// The connection task owns the socket; everything else (registry, lobby,
/// round) holds this handle. Sends are queued on an unbounded channel and
/// drained by the connection's writer task, so no caller ever blocks on a
/// slow peer. A send to a closed queue flips the connected flag; the handle
/// is then invisible to quorum checks and final standings.
pub struct ClientHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
    connected: AtomicBool,
    score: AtomicI32,
    name: Mutex<Option<String>>,
    account_id: Mutex<Option<Uuid>>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
            connected: AtomicBool::new(true),
            score: AtomicI32::new(0),
            name: Mutex::new(None),
            account_id: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Display name, if one has been bound by login or a lobby request.
    pub fn name(&self) -> Option<String> {
        self.name.lock().expect("name lock poisoned").clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock().expect("name lock poisoned") = Some(name.to_string());
    }

    /// Binds a display name only if none is bound yet; a logged-in name is
    /// never overwritten by a lobby request.
    pub fn bind_name_if_empty(&self, name: &str) {
        let mut slot = self.name.lock().expect("name lock poisoned");
        if slot.is_none() && !name.trim().is_empty() {
            *slot = Some(name.to_string());
        }
    }

    pub fn account_id(&self) -> Option<Uuid> {
        *self.account_id.lock().expect("account lock poisoned")
    }

    pub fn bind_account(&self, id: Uuid) {
        *self.account_id.lock().expect("account lock poisoned") = Some(id);
    }

    pub fn score(&self) -> i32 {
        self.score.load(Ordering::SeqCst)
    }

    pub fn set_score(&self, value: i32) {
        self.score.store(value, Ordering::SeqCst);
    }

    /// Applies a score delta and returns the new total. Scores may go
    /// negative on wrong answers.
    pub fn add_score(&self, delta: i32) -> i32 {
        self.score.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.id.to_string(),
            player_name: self.name().unwrap_or_default(),
            score: self.score(),
        }
    }

    /// Serializes and queues one envelope. Best-effort: failure marks the
    /// handle disconnected and is otherwise swallowed.
    pub fn send(&self, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(text) => self.send_raw(text),
            Err(e) => error!("Failed to serialize outbound message: {}", e),
        }
    }

    pub fn send_raw(&self, text: String) {
        if !self.is_connected() {
            return;
        }
        if self.tx.send(text).is_err() {
            self.mark_disconnected();
        }
    }
}

/// Tracks all currently-connected client handles.
///
/// This is one of the two lock domains in the server: the handle set is
/// guarded by its own mutex, held only long enough to mutate or copy the
/// set. Actual sends happen against the snapshot, outside the lock.
pub struct SessionRegistry {
    clients: Mutex<Vec<Arc<ClientHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
        }
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, Vec<Arc<ClientHandle>>> {
        self.clients.lock().expect("registry lock poisoned")
    }

    pub fn register(&self, handle: Arc<ClientHandle>) {
        let mut clients = self.lock_clients();
        info!("Client {} connected, {} online", handle.id(), clients.len() + 1);
        clients.push(handle);
    }

    /// Removes a handle by id. Returns true if it was present; repeated
    /// removal of the same handle is a no-op.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut clients = self.lock_clients();
        let before = clients.len();
        clients.retain(|c| c.id() != id);
        let removed = clients.len() < before;
        if removed {
            info!("Client {} removed, {} online", id, clients.len());
        }
        removed
    }

    /// Point-in-time copy of the handle set.
    pub fn snapshot(&self) -> Vec<Arc<ClientHandle>> {
        self.lock_clients().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_clients().is_empty()
    }

    /// Sends one envelope to every connected client. Individual failures
    /// are swallowed; they only mark the failing handle disconnected.
    pub fn broadcast(&self, message: &ServerMessage) {
        Self::send_to(&self.snapshot(), message);
    }

    pub fn broadcast_except(&self, message: &ServerMessage, excluded: &ClientHandle) {
        let recipients: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|c| c.id() != excluded.id())
            .collect();
        Self::send_to(&recipients, message);
    }

    /// Sends one envelope to an explicit subset, serializing once.
    pub fn send_to(recipients: &[Arc<ClientHandle>], message: &ServerMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize broadcast: {}", e);
                return;
            }
        };
        for client in recipients {
            client.send_raw(text.clone());
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
