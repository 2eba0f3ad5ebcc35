mod clock;
/// Awareness - the ephemeral state collaborator rooms are built on
///
/// Unlike CRDTs which persist data, awareness tracks ephemeral state like:
/// - Who's online
/// - Cursor positions
/// - User selections
/// - Custom presence data
///
/// Rooms only talk to awareness through [`AwarenessBackend`], so any
/// provider's awareness (WebSocket, WebRTC, a test double) can sit behind a
/// room. [`Awareness`] is the in-memory implementation shipped with the crate.
mod state;

pub use clock::IncreasingClock;
pub use state::{Awareness, AwarenessEntry, AwarenessUpdate};

use crate::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Presence payload as stored by the collaborator: a JSON object
pub type PresenceState = serde_json::Map<String, serde_json::Value>;

/// Callback registered for awareness `change` events
pub type ChangeHandler = Rc<dyn Fn(&AwarenessChange, &Origin)>;

/// Where a change came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Caused by a write to the local state slot
    Local,
    /// Applied from a peer's update
    Remote,
    /// Remote clients expired by the outdated check
    Timeout,
    /// Provider-specific origin tag
    Custom(String),
}

impl Origin {
    /// Only `Local` counts as self-originated; every other tag is treated as remote
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::Remote => f.write_str("remote"),
            Origin::Timeout => f.write_str("timeout"),
            Origin::Custom(tag) => f.write_str(tag),
        }
    }
}

/// Connection ids touched by one awareness transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessChange {
    pub added: Vec<ConnectionId>,
    pub updated: Vec<ConnectionId>,
    pub removed: Vec<ConnectionId>,
}

impl AwarenessChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// All touched ids: added, then updated, then removed
    pub fn changed(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.added
            .iter()
            .chain(&self.updated)
            .chain(&self.removed)
            .copied()
    }
}

/// Identifies a registered change handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// The surface a room consumes from an awareness implementation.
///
/// Implementations serialize their own mutations and deliver one `change`
/// notification per logical update. Handlers must be invoked without holding
/// any internal borrow, since rooms read the states back from inside them.
pub trait AwarenessBackend {
    /// Stable identifier of this participant
    fn local_id(&self) -> ConnectionId;

    fn local_state(&self) -> Option<PresenceState>;

    /// Replace the local state; `None` signals departure
    fn set_local_state(&self, state: Option<PresenceState>);

    /// Update a single field of the local state; no-op while the state is absent
    fn set_local_state_field(&self, key: &str, value: serde_json::Value);

    /// Merge several fields into the local state in a single transaction
    fn merge_local_state(&self, fields: PresenceState) {
        if let Some(mut state) = self.local_state() {
            state.extend(fields);
            self.set_local_state(Some(state));
        }
    }

    /// All known states in enumeration order, local entry included
    fn states(&self) -> Vec<(ConnectionId, PresenceState)>;

    fn on_change(&self, handler: ChangeHandler) -> HandlerId;

    fn off_change(&self, id: HandlerId);

    /// Release collaborator resources
    fn destroy(&self);
}
