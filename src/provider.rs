//! Presence provider and session registry
//!
//! A [`PresenceProvider`] scopes exactly one [`Room`] to a session: the room
//! is built lazily on first use and destroyed on teardown. Descendants find
//! the room through an explicit [`SessionRegistry`] instead of an implicit
//! context, and a lookup outside an active session is an error.

use crate::awareness::{Awareness, AwarenessBackend};
use crate::config::RoomOptions;
use crate::error::{PresenceError, Result};
use crate::room::Room;
use crate::Presence;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, OnceCell};
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

/// Identifies one mounted presence session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Owns the lifecycle of one room
pub struct PresenceProvider<T: Presence, B: AwarenessBackend + 'static = Awareness> {
    awareness: Rc<B>,
    initial: Option<T>,
    options: RoomOptions,
    room: OnceCell<Room<T, B>>,
    torn_down: Cell<bool>,
}

impl<T: Presence, B: AwarenessBackend + 'static> PresenceProvider<T, B> {
    pub fn new(awareness: Rc<B>, initial: Option<T>) -> Self {
        Self::with_options(awareness, initial, RoomOptions::default())
    }

    pub fn with_options(awareness: Rc<B>, initial: Option<T>, options: RoomOptions) -> Self {
        Self {
            awareness,
            initial,
            options,
            room: OnceCell::new(),
            torn_down: Cell::new(false),
        }
    }

    /// The provider's room, built on first call. Fails once the provider is
    /// torn down or the room was destroyed directly
    pub fn room(&self) -> Result<Room<T, B>> {
        if !self.is_active() {
            return Err(PresenceError::NoActiveSession);
        }
        if let Some(room) = self.room.get() {
            return Ok(room.clone());
        }

        let room = Room::with_options(self.awareness.clone(), self.initial.clone(), self.options)?;
        // Building the room never re-enters the provider, so the cell is still empty
        let _ = self.room.set(room.clone());
        Ok(room)
    }

    pub fn is_active(&self) -> bool {
        !self.torn_down.get() && !self.room.get().is_some_and(Room::is_destroyed)
    }

    /// Whether the room has been built yet
    pub fn is_mounted(&self) -> bool {
        self.room.get().is_some()
    }

    /// Destroy the room (if it was built). Idempotent
    pub fn teardown(&self) {
        if self.torn_down.replace(true) {
            return;
        }
        if let Some(room) = self.room.get() {
            room.destroy();
        }
    }
}

impl<T: Presence, B: AwarenessBackend + 'static> Drop for PresenceProvider<T, B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<T: Presence, B: AwarenessBackend + 'static> fmt::Debug for PresenceProvider<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceProvider")
            .field("local_id", &self.awareness.local_id())
            .field("mounted", &self.is_mounted())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Explicit lookup of the active room per session
pub struct SessionRegistry<T: Presence, B: AwarenessBackend + 'static = Awareness> {
    sessions: IndexMap<SessionId, PresenceProvider<T, B>>,
}

impl<T: Presence, B: AwarenessBackend + 'static> SessionRegistry<T, B> {
    pub fn new() -> Self {
        Self {
            sessions: IndexMap::new(),
        }
    }

    /// Mount a provider for a new session
    pub fn mount(&mut self, awareness: Rc<B>, initial: Option<T>) -> SessionId {
        self.mount_with_options(awareness, initial, RoomOptions::default())
    }

    pub fn mount_with_options(
        &mut self,
        awareness: Rc<B>,
        initial: Option<T>,
        options: RoomOptions,
    ) -> SessionId {
        let id = SessionId::new();
        self.sessions
            .insert(id, PresenceProvider::with_options(awareness, initial, options));
        tracing::debug!(session = %id, "presence session mounted");
        id
    }

    /// The room of an active session
    pub fn room(&self, id: &SessionId) -> Result<Room<T, B>> {
        self.sessions
            .get(id)
            .ok_or(PresenceError::NoActiveSession)?
            .room()
    }

    /// Tear the session down and forget it
    pub fn unmount(&mut self, id: &SessionId) -> Result<()> {
        let provider = self
            .sessions
            .shift_remove(id)
            .ok_or(PresenceError::NoActiveSession)?;
        provider.teardown();
        tracing::debug!(session = %id, "presence session unmounted");
        Ok(())
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<T: Presence, B: AwarenessBackend + 'static> Default for SessionRegistry<T, B> {
    fn default() -> Self {
        Self::new()
    }
}
