//! y-presence - presence layer for CRDT awareness
//!
//! Wraps an awareness collaborator (a map of connection id to ephemeral state
//! plus change notifications) and exposes it as three independently
//! subscribable views:
//! - **self**: the local participant
//! - **others**: every participant except the local one
//! - **users**: everyone, local participant included
//!
//! Local writes only notify `self` and `users` listeners; remote changes only
//! notify `others` and `users` listeners.
//!
//! # Examples
//!
//! ```rust
//! use std::rc::Rc;
//! use serde::{Deserialize, Serialize};
//! use y_presence::{Awareness, Room};
//!
//! #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
//! struct Cursor {
//!     x: i32,
//!     y: i32,
//! }
//!
//! let awareness = Rc::new(Awareness::new(1));
//! let room = Room::new(awareness, Some(Cursor { x: 0, y: 0 })).unwrap();
//!
//! let _subscription = room
//!     .on_users(|users| println!("{} connected", users.len()))
//!     .unwrap();
//!
//! room.update_presence(&serde_json::json!({ "x": 5 })).unwrap();
//! assert_eq!(room.get_self().presence, Some(Cursor { x: 5, y: 0 }));
//! ```

pub mod awareness;
pub mod config;
pub mod error;
pub mod hooks;
pub mod provider;
pub mod room;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-exports for convenience
pub use awareness::{Awareness, AwarenessBackend, AwarenessChange, Origin, PresenceState};
pub use config::{AwarenessConfig, RoomOptions};
pub use error::{PresenceError, Result};
pub use hooks::{use_others, use_self, use_selector, use_update_presence, use_users, Hook};
pub use provider::{PresenceProvider, SessionId, SessionRegistry};
pub use room::{Callback, Room, Subscription, User, View, ViewKind, WeakRoom};

/// Connection identifier assigned by the awareness collaborator
pub type ConnectionId = u64;

/// Application-defined presence payload.
///
/// Implemented for every type that round-trips through JSON; payloads must
/// serialize to a JSON object so they can be merged field by field.
pub trait Presence: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static {}

impl<T> Presence for T where T: serde::Serialize + serde::de::DeserializeOwned + Clone + 'static {}
