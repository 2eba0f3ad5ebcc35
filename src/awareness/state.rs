/// Awareness State Management
///
/// Tracks ephemeral state for all connected clients, in the order they were
/// first seen. State is stored as a JSON object per client and accepted from
/// peers only when its clock is newer than the one already known.
use super::clock::IncreasingClock;
use super::{AwarenessBackend, AwarenessChange, ChangeHandler, HandlerId, Origin, PresenceState};
use crate::config::AwarenessConfig;
use crate::error::Result;
use crate::ConnectionId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::Instant;

/// One client's entry in an update message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessEntry {
    pub client_id: ConnectionId,
    pub clock: u64,
    pub state: Option<PresenceState>, // None = client left
}

/// Update message exchanged between peers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub entries: Vec<AwarenessEntry>,
}

impl AwarenessUpdate {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Copy)]
struct ClientMeta {
    clock: u64,
    /// Not tracked in WASM builds
    last_updated: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    states: IndexMap<ConnectionId, PresenceState>,
    // Kept after a client leaves so stale re-announcements are rejected
    meta: HashMap<ConnectionId, ClientMeta>,
}

impl Inner {
    /// Store `state` for `client_id` and classify the transition
    fn write(
        &mut self,
        client_id: ConnectionId,
        state: Option<PresenceState>,
        clock: u64,
        change: &mut AwarenessChange,
    ) {
        let prev = match state {
            Some(ref next) => self.states.insert(client_id, next.clone()),
            None => self.states.shift_remove(&client_id),
        };
        self.meta.insert(
            client_id,
            ClientMeta {
                clock,
                last_updated: stamp(),
            },
        );

        match (prev, state) {
            (None, Some(_)) => change.added.push(client_id),
            (Some(_), None) => change.removed.push(client_id),
            (Some(prev), Some(next)) if prev != next => change.updated.push(client_id),
            _ => {}
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn stamp() -> Option<Instant> {
    Some(Instant::now())
}

#[cfg(target_arch = "wasm32")]
fn stamp() -> Option<Instant> {
    None
}

/// In-memory awareness tracking all client states
pub struct Awareness {
    client_id: ConnectionId,
    config: AwarenessConfig,
    clock: IncreasingClock,
    inner: RefCell<Inner>,
    handlers: RefCell<Vec<(HandlerId, ChangeHandler)>>,
    next_handler: Cell<u64>,
    destroyed: Cell<bool>,
}

impl Awareness {
    /// Create new awareness instance
    pub fn new(client_id: ConnectionId) -> Self {
        Self::with_config(client_id, AwarenessConfig::default())
    }

    pub fn with_config(client_id: ConnectionId, config: AwarenessConfig) -> Self {
        Self {
            client_id,
            config,
            clock: IncreasingClock::new(),
            inner: RefCell::new(Inner::default()),
            handlers: RefCell::new(Vec::new()),
            next_handler: Cell::new(0),
            destroyed: Cell::new(false),
        }
    }

    pub fn config(&self) -> &AwarenessConfig {
        &self.config
    }

    /// Get state for a specific client
    pub fn get_state(&self, client_id: ConnectionId) -> Option<PresenceState> {
        self.inner.borrow().states.get(&client_id).cloned()
    }

    /// Current clock known for a client, including clients that already left
    pub fn clock_of(&self, client_id: ConnectionId) -> Option<u64> {
        self.inner.borrow().meta.get(&client_id).map(|meta| meta.clock)
    }

    /// Encode the current entries of `clients` for broadcast
    pub fn encode_update(&self, clients: &[ConnectionId]) -> AwarenessUpdate {
        let inner = self.inner.borrow();
        let entries = clients
            .iter()
            .filter_map(|&client_id| {
                let meta = inner.meta.get(&client_id)?;
                Some(AwarenessEntry {
                    client_id,
                    clock: meta.clock,
                    state: inner.states.get(&client_id).cloned(),
                })
            })
            .collect();
        AwarenessUpdate { entries }
    }

    /// Apply a peer's update, emitting one change tagged with `origin`.
    ///
    /// Returns the local entry to re-broadcast when a peer announced our
    /// removal while we are still present.
    pub fn apply_update(&self, update: AwarenessUpdate, origin: Origin) -> Option<AwarenessUpdate> {
        let mut change = AwarenessChange::default();
        let mut outbid = false;
        {
            let mut inner = self.inner.borrow_mut();
            for entry in update.entries {
                // Keep our clock ahead of everything we have seen
                self.clock.update_to_max(entry.clock);

                let current = inner.meta.get(&entry.client_id).map_or(0, |meta| meta.clock);
                let is_newer = current < entry.clock
                    || (current == entry.clock
                        && entry.state.is_none()
                        && inner.states.contains_key(&entry.client_id));
                if !is_newer {
                    continue;
                }

                if entry.client_id == self.client_id && entry.state.is_none() {
                    // A peer timed us out while we are still here: outbid its removal
                    if inner.states.contains_key(&self.client_id) {
                        let clock = self.clock.increment();
                        if let Some(meta) = inner.meta.get_mut(&self.client_id) {
                            meta.clock = clock;
                            meta.last_updated = stamp();
                        }
                        outbid = true;
                        continue;
                    }
                }

                inner.write(entry.client_id, entry.state, entry.clock, &mut change);
            }
        }
        self.emit(&change, &origin);
        outbid.then(|| self.encode_update(&[self.client_id]))
    }

    /// Remove remote clients that haven't updated within the configured timeout.
    /// Returns the removed client IDs
    #[cfg(not(target_arch = "wasm32"))]
    pub fn remove_stale_clients(&self, now: Instant) -> Vec<ConnectionId> {
        let timeout = self.config.timeout;
        let mut change = AwarenessChange::default();
        {
            let mut inner = self.inner.borrow_mut();
            let stale: Vec<ConnectionId> = inner
                .states
                .keys()
                .copied()
                .filter(|&client_id| client_id != self.client_id)
                .filter(|client_id| {
                    inner
                        .meta
                        .get(client_id)
                        .and_then(|meta| meta.last_updated)
                        .is_some_and(|last| now.saturating_duration_since(last) >= timeout)
                })
                .collect();

            for client_id in stale {
                inner.states.shift_remove(&client_id);
                change.removed.push(client_id);
            }
        }

        if !change.removed.is_empty() {
            tracing::debug!(removed = ?change.removed, "expired stale awareness clients");
        }
        self.emit(&change, &Origin::Timeout);
        change.removed
    }

    /// Expire stale remote clients as of now
    #[cfg(not(target_arch = "wasm32"))]
    pub fn check_outdated(&self) -> Vec<ConnectionId> {
        self.remove_stale_clients(Instant::now())
    }

    /// Renew the local entry once it is older than the heartbeat interval.
    /// Returns the update to broadcast, if any. Never emits `change`.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn heartbeat(&self, now: Instant) -> Option<AwarenessUpdate> {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.states.contains_key(&self.client_id) {
                return None;
            }
            let meta = inner.meta.get_mut(&self.client_id)?;
            let due = meta.last_updated.map_or(true, |last| {
                now.saturating_duration_since(last) >= self.config.heartbeat_interval
            });
            if !due {
                return None;
            }
            meta.clock = self.clock.increment();
            meta.last_updated = Some(now);
        }
        Some(self.encode_update(&[self.client_id]))
    }

    /// Get number of online clients (including self)
    pub fn client_count(&self) -> usize {
        self.inner.borrow().states.len()
    }

    /// Get number of online clients excluding self
    pub fn other_client_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .states
            .len()
            .saturating_sub(usize::from(inner.states.contains_key(&self.client_id)))
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    fn emit(&self, change: &AwarenessChange, origin: &Origin) {
        if change.is_empty() {
            return;
        }
        // Handlers may register or remove handlers while running
        let handlers: Vec<ChangeHandler> = self
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(change, origin);
        }
    }
}

impl AwarenessBackend for Awareness {
    fn local_id(&self) -> ConnectionId {
        self.client_id
    }

    fn local_state(&self) -> Option<PresenceState> {
        self.get_state(self.client_id)
    }

    fn set_local_state(&self, state: Option<PresenceState>) {
        let clock = self.clock.increment();
        let mut change = AwarenessChange::default();
        self.inner
            .borrow_mut()
            .write(self.client_id, state, clock, &mut change);
        self.emit(&change, &Origin::Local);
    }

    fn set_local_state_field(&self, key: &str, value: serde_json::Value) {
        if let Some(mut state) = self.local_state() {
            state.insert(key.to_string(), value);
            self.set_local_state(Some(state));
        }
    }

    fn states(&self) -> Vec<(ConnectionId, PresenceState)> {
        self.inner
            .borrow()
            .states
            .iter()
            .map(|(&client_id, state)| (client_id, state.clone()))
            .collect()
    }

    fn on_change(&self, handler: ChangeHandler) -> HandlerId {
        let id = HandlerId(self.next_handler.get());
        self.next_handler.set(id.0 + 1);
        self.handlers.borrow_mut().push((id, handler));
        id
    }

    fn off_change(&self, id: HandlerId) {
        self.handlers
            .borrow_mut()
            .retain(|(handler_id, _)| *handler_id != id);
    }

    fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.set_local_state(None);
        self.handlers.borrow_mut().clear();
    }
}

impl std::fmt::Debug for Awareness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Awareness")
            .field("client_id", &self.client_id)
            .field("clock", &self.clock.get())
            .field("states", &self.inner.borrow().states)
            .field("handlers", &self.handlers.borrow().len())
            .finish()
    }
}
