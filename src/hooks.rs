//! Subscription hook adapters
//!
//! Bridges a room's callback subscriptions to a "subscribe to an external
//! store, read an immutable snapshot" rendering model. A [`Hook`] owns a
//! snapshot of one view and a re-render callback:
//!
//! - the snapshot is taken synchronously on mount,
//! - every dispatch pulls a fresh snapshot from the room and calls re-render,
//!   unless an equality function says nothing changed,
//! - unmounting (or dropping the hook) unsubscribes exactly once.
//!
//! Without an equality function every dispatch counts as a change.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use serde_json::{json, Value};
//! use y_presence::{use_self, Awareness, Room};
//!
//! let room: Room<Value> = Room::new(Rc::new(Awareness::new(1)), Some(json!({"x": 0}))).unwrap();
//! let renders = Rc::new(Cell::new(0));
//! let counter = renders.clone();
//! let me = use_self(&room, move || counter.set(counter.get() + 1)).unwrap();
//!
//! room.set_presence(&json!({"x": 1})).unwrap();
//! assert_eq!(renders.get(), 1);
//! assert_eq!(me.snapshot().presence, Some(json!({"x": 1})));
//! ```

use crate::awareness::{Awareness, AwarenessBackend};
use crate::error::{PresenceError, Result};
use crate::room::{callback, Room, Subscription, User, View, ViewKind, WeakRoom};
use crate::Presence;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type Equality<S> = Box<dyn Fn(&S, &S) -> bool>;

struct HookState<S> {
    snapshot: S,
    equality: Option<Equality<S>>,
    // Cleared on unmount; a pass already in flight may still call us
    mounted: bool,
}

/// Snapshot of one room view kept in sync through a subscription
pub struct Hook<S> {
    state: Rc<RefCell<HookState<S>>>,
    subscription: Subscription,
}

impl<S: Clone + 'static> Hook<S> {
    /// Subscribe to `kind`, deriving snapshots with `select`
    pub fn mount<T, B, F, R>(room: &Room<T, B>, kind: ViewKind, select: F, rerender: R) -> Result<Self>
    where
        T: Presence,
        B: AwarenessBackend + 'static,
        F: Fn(&Room<T, B>) -> S + 'static,
        R: Fn() + 'static,
    {
        if room.is_destroyed() {
            return Err(PresenceError::Destroyed);
        }

        let state = Rc::new(RefCell::new(HookState {
            snapshot: select(room),
            equality: None,
            mounted: true,
        }));

        let weak: WeakRoom<T, B> = room.downgrade();
        let shared = state.clone();
        let subscription = room.subscribe(
            kind,
            callback(move |_view: View<'_, T>| {
                if !shared.borrow().mounted {
                    return;
                }
                let Some(room) = weak.upgrade() else {
                    return;
                };
                let next = select(&room);
                let changed = {
                    let mut guard = shared.borrow_mut();
                    let state = &mut *guard;
                    let unchanged = state
                        .equality
                        .as_ref()
                        .is_some_and(|equal| equal(&state.snapshot, &next));
                    if !unchanged {
                        state.snapshot = next;
                    }
                    !unchanged
                };
                if changed {
                    rerender();
                }
            }),
        )?;

        Ok(Self {
            state,
            subscription,
        })
    }

    /// Skip re-renders when `equal(previous, next)` holds
    pub fn with_equality<E>(self, equal: E) -> Self
    where
        E: Fn(&S, &S) -> bool + 'static,
    {
        self.state.borrow_mut().equality = Some(Box::new(equal));
        self
    }

    /// Current snapshot
    pub fn snapshot(&self) -> S {
        self.state.borrow().snapshot.clone()
    }
}

impl<S> Hook<S> {
    pub fn is_mounted(&self) -> bool {
        self.subscription.is_active()
    }

    /// Unsubscribe from the room; later calls do nothing
    pub fn unmount(&self) {
        self.state.borrow_mut().mounted = false;
        self.subscription.unsubscribe();
    }
}

impl<S> Drop for Hook<S> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<S: fmt::Debug> fmt::Debug for Hook<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("snapshot", &self.state.borrow().snapshot)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

/// Track the local user
pub fn use_self<T, B, R>(room: &Room<T, B>, rerender: R) -> Result<Hook<User<T>>>
where
    T: Presence,
    B: AwarenessBackend + 'static,
    R: Fn() + 'static,
{
    Hook::mount(room, ViewKind::Local, Room::get_self, rerender)
}

/// Track every user except the local one
pub fn use_others<T, B, R>(room: &Room<T, B>, rerender: R) -> Result<Hook<Vec<User<T>>>>
where
    T: Presence,
    B: AwarenessBackend + 'static,
    R: Fn() + 'static,
{
    Hook::mount(room, ViewKind::Others, Room::get_others, rerender)
}

/// Track every user, local one included
pub fn use_users<T, B, R>(room: &Room<T, B>, rerender: R) -> Result<Hook<Vec<User<T>>>>
where
    T: Presence,
    B: AwarenessBackend + 'static,
    R: Fn() + 'static,
{
    Hook::mount(room, ViewKind::Users, Room::get_users, rerender)
}

/// Track a projection of a view, re-rendering only when `equal` says the
/// projection changed
pub fn use_selector<T, B, S, F, E, R>(
    room: &Room<T, B>,
    kind: ViewKind,
    select: F,
    equal: E,
    rerender: R,
) -> Result<Hook<S>>
where
    T: Presence,
    B: AwarenessBackend + 'static,
    S: Clone + 'static,
    F: Fn(&Room<T, B>) -> S + 'static,
    E: Fn(&S, &S) -> bool + 'static,
    R: Fn() + 'static,
{
    Ok(Hook::mount(room, kind, select, rerender)?.with_equality(equal))
}

/// Setter bound to a room that does not keep it alive
pub struct PresenceUpdater<T: Presence, B: AwarenessBackend + 'static = Awareness> {
    room: WeakRoom<T, B>,
}

impl<T: Presence, B: AwarenessBackend + 'static> PresenceUpdater<T, B> {
    fn room(&self) -> Result<Room<T, B>> {
        self.room.upgrade().ok_or(PresenceError::Destroyed)
    }

    pub fn set(&self, presence: &T) -> Result<()> {
        self.room()?.set_presence(presence)
    }

    pub fn update<P: Serialize + ?Sized>(&self, partial: &P) -> Result<()> {
        self.room()?.update_presence(partial)
    }
}

impl<T: Presence, B: AwarenessBackend + 'static> Clone for PresenceUpdater<T, B> {
    fn clone(&self) -> Self {
        Self {
            room: self.room.clone(),
        }
    }
}

/// Setter for the local presence
pub fn use_update_presence<T, B>(room: &Room<T, B>) -> PresenceUpdater<T, B>
where
    T: Presence,
    B: AwarenessBackend + 'static,
{
    PresenceUpdater {
        room: room.downgrade(),
    }
}
