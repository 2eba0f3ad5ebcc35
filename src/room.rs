//! Room: the presence store
//!
//! A [`Room`] wraps one awareness collaborator and turns its connection-id to
//! state map into three views (self, others, users). It keeps one listener
//! registry per view and re-derives the views on every awareness change:
//!
//! 1. `users` listeners are always notified.
//! 2. Local-origin changes notify `self` listeners only.
//! 3. Every other origin notifies `others` listeners only.
//!
//! A participant's own edit cannot change what it sees as "others", and a
//! peer's edit cannot change "self", so the split never drops an update.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use serde_json::{json, Value};
//! use y_presence::{Awareness, Room};
//!
//! let room: Room<Value> = Room::new(Rc::new(Awareness::new(1)), Some(json!({"x": 0}))).unwrap();
//! let subscription = room.on_self(|me| println!("moved to {:?}", me.presence)).unwrap();
//!
//! room.set_presence(&json!({"x": 10})).unwrap();
//! subscription.unsubscribe();
//! ```

use crate::awareness::{
    Awareness, AwarenessBackend, AwarenessChange, HandlerId, Origin, PresenceState,
};
use crate::config::RoomOptions;
use crate::error::{PresenceError, Result};
use crate::{ConnectionId, Presence};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::str::FromStr;

/// A participant connected to the room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User<T> {
    /// The connection id associated to the user
    pub id: ConnectionId,
    /// `None` before the first state is set, after the user left, or when the
    /// stored state does not decode into `T`
    pub presence: Option<T>,
}

/// The three views a room derives from awareness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewKind {
    /// The local participant ("self")
    #[serde(rename = "self")]
    Local,
    #[serde(rename = "others")]
    Others,
    #[serde(rename = "users")]
    Users,
}

impl ViewKind {
    pub const ALL: [ViewKind; 3] = [ViewKind::Local, ViewKind::Others, ViewKind::Users];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::Local => "self",
            ViewKind::Others => "others",
            ViewKind::Users => "users",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a view name is not one of `self`, `others`, `users`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownViewKind(pub String);

impl fmt::Display for UnknownViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown view kind {:?}", self.0)
    }
}

impl std::error::Error for UnknownViewKind {}

impl FromStr for ViewKind {
    type Err = UnknownViewKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "self" => Ok(ViewKind::Local),
            "others" => Ok(ViewKind::Others),
            "users" => Ok(ViewKind::Users),
            other => Err(UnknownViewKind(other.to_string())),
        }
    }
}

/// Freshly derived view handed to listeners
#[derive(Debug)]
pub enum View<'a, T> {
    Local(&'a User<T>),
    Others(&'a [User<T>]),
    Users(&'a [User<T>]),
}

impl<T> Clone for View<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for View<'_, T> {}

impl<'a, T> View<'a, T> {
    pub fn kind(&self) -> ViewKind {
        match self {
            View::Local(_) => ViewKind::Local,
            View::Others(_) => ViewKind::Others,
            View::Users(_) => ViewKind::Users,
        }
    }

    /// The local user, for `self` views
    pub fn user(&self) -> Option<&'a User<T>> {
        match *self {
            View::Local(user) => Some(user),
            _ => None,
        }
    }

    /// The user list, for `others` and `users` views
    pub fn users(&self) -> Option<&'a [User<T>]> {
        match *self {
            View::Others(users) | View::Users(users) => Some(users),
            View::Local(_) => None,
        }
    }
}

/// Listener callback. Identity is the `Rc` allocation, which is what
/// [`Room::unsubscribe`] matches on.
pub type Callback<T> = Rc<dyn Fn(View<'_, T>)>;

/// Wrap a closure as a [`Callback`]
pub fn callback<T, F>(f: F) -> Callback<T>
where
    F: Fn(View<'_, T>) + 'static,
{
    Rc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ListenerId(u64);

struct Registration<T> {
    id: ListenerId,
    callback: Callback<T>,
}

struct Listeners<T> {
    local: Vec<Registration<T>>,
    others: Vec<Registration<T>>,
    users: Vec<Registration<T>>,
    next_id: u64,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            local: Vec::new(),
            others: Vec::new(),
            users: Vec::new(),
            next_id: 0,
        }
    }

    fn slot(&self, kind: ViewKind) -> &Vec<Registration<T>> {
        match kind {
            ViewKind::Local => &self.local,
            ViewKind::Others => &self.others,
            ViewKind::Users => &self.users,
        }
    }

    fn slot_mut(&mut self, kind: ViewKind) -> &mut Vec<Registration<T>> {
        match kind {
            ViewKind::Local => &mut self.local,
            ViewKind::Others => &mut self.others,
            ViewKind::Users => &mut self.users,
        }
    }

    fn add(&mut self, kind: ViewKind, callback: Callback<T>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.slot_mut(kind).push(Registration { id, callback });
        id
    }

    fn remove_id(&mut self, kind: ViewKind, id: ListenerId) {
        self.slot_mut(kind).retain(|registration| registration.id != id);
    }

    fn remove_callback(&mut self, kind: ViewKind, callback: &Callback<T>) {
        let slot = self.slot_mut(kind);
        if let Some(index) = slot
            .iter()
            .position(|registration| Rc::ptr_eq(&registration.callback, callback))
        {
            slot.remove(index);
        }
    }

    fn snapshot(&self, kind: ViewKind) -> Vec<Callback<T>> {
        self.slot(kind)
            .iter()
            .map(|registration| registration.callback.clone())
            .collect()
    }

    fn clear(&mut self) {
        self.local.clear();
        self.others.clear();
        self.users.clear();
    }
}

/// Handle returned by `subscribe`; removes exactly its own registration.
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    cancel: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Cell::new(Some(Box::new(cancel))),
        }
    }

    /// A handle that removes nothing
    pub fn noop() -> Self {
        Self {
            cancel: Cell::new(None),
        }
    }

    /// Remove the listener. Calling this more than once has no further effect
    pub fn unsubscribe(&self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        // Cell<Option<Box<_>>> can't be peeked; swap out and back in
        let cancel = self.cancel.take();
        let active = cancel.is_some();
        self.cancel.set(cancel);
        active
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

struct RoomInner<T, B: AwarenessBackend> {
    awareness: Rc<B>,
    options: RoomOptions,
    listeners: RefCell<Listeners<T>>,
    handler: Cell<Option<HandlerId>>,
    destroyed: Cell<bool>,
}

impl<T, B: AwarenessBackend> Drop for RoomInner<T, B> {
    fn drop(&mut self) {
        if let Some(id) = self.handler.take() {
            self.awareness.off_change(id);
        }
    }
}

/// Presence store bound to one awareness collaborator.
///
/// Cloning yields another handle to the same room.
pub struct Room<T: Presence, B: AwarenessBackend + 'static = Awareness> {
    inner: Rc<RoomInner<T, B>>,
}

impl<T: Presence, B: AwarenessBackend + 'static> Clone for Room<T, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Presence, B: AwarenessBackend + 'static> Room<T, B> {
    /// Create a room, writing `initial` (or `{"id": <local id>}`) as the local state
    pub fn new(awareness: Rc<B>, initial: Option<T>) -> Result<Self> {
        Self::with_options(awareness, initial, RoomOptions::default())
    }

    pub fn with_options(awareness: Rc<B>, initial: Option<T>, options: RoomOptions) -> Result<Self> {
        let local_id = awareness.local_id();
        let state = match initial {
            Some(presence) => to_state(&presence)?,
            None => {
                let mut state = PresenceState::new();
                state.insert("id".to_string(), Value::from(local_id));
                state
            }
        };

        let room = Self {
            inner: Rc::new(RoomInner {
                awareness,
                options,
                listeners: RefCell::new(Listeners::new()),
                handler: Cell::new(None),
                destroyed: Cell::new(false),
            }),
        };
        room.inner.awareness.set_local_state(Some(state));

        let weak = Rc::downgrade(&room.inner);
        let handler = room.inner.awareness.on_change(Rc::new(
            move |change: &AwarenessChange, origin: &Origin| {
                if let Some(inner) = weak.upgrade() {
                    Room { inner }.handle_change(change, origin);
                }
            },
        ));
        room.inner.handler.set(Some(handler));

        tracing::debug!(local_id, "room created");
        Ok(room)
    }

    pub fn local_id(&self) -> ConnectionId {
        self.inner.awareness.local_id()
    }

    pub fn awareness(&self) -> &Rc<B> {
        &self.inner.awareness
    }

    pub fn options(&self) -> &RoomOptions {
        &self.inner.options
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    pub fn downgrade(&self) -> WeakRoom<T, B> {
        WeakRoom {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// The local user, read synchronously from awareness
    pub fn get_self(&self) -> User<T> {
        let id = self.local_id();
        User {
            id,
            presence: self
                .inner
                .awareness
                .local_state()
                .and_then(|state| decode(id, state)),
        }
    }

    /// Every user except the local one, in awareness enumeration order
    pub fn get_others(&self) -> Vec<User<T>> {
        let local_id = self.local_id();
        self.inner
            .awareness
            .states()
            .into_iter()
            .filter(|(id, _)| *id != local_id)
            .map(|(id, state)| User {
                id,
                presence: decode(id, state),
            })
            .collect()
    }

    /// Every user, local one included, in awareness enumeration order
    pub fn get_users(&self) -> Vec<User<T>> {
        self.inner
            .awareness
            .states()
            .into_iter()
            .map(|(id, state)| User {
                id,
                presence: decode(id, state),
            })
            .collect()
    }

    /// Replace the local presence in a single transaction
    pub fn set_presence(&self, presence: &T) -> Result<()> {
        self.ensure_live()?;
        let state = to_state(presence)?;
        self.inner.awareness.set_local_state(Some(state));
        Ok(())
    }

    /// Merge `partial` into the local presence: named fields are overwritten,
    /// everything else is kept
    pub fn update_presence<P>(&self, partial: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        self.ensure_live()?;
        let fields = to_state(partial)?;
        if fields.is_empty() {
            return Ok(());
        }
        self.inner.awareness.merge_local_state(fields);
        Ok(())
    }

    /// Register `callback` for a view. Duplicate registrations are kept and
    /// each gets its own handle
    pub fn subscribe(&self, kind: ViewKind, callback: Callback<T>) -> Result<Subscription> {
        self.ensure_live()?;
        let id = self.inner.listeners.borrow_mut().add(kind, callback);

        let weak = Rc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.borrow_mut().remove_id(kind, id);
            }
        }))
    }

    /// Like [`subscribe`](Self::subscribe) with the view given by name.
    /// Unknown names are logged and yield a no-op handle
    pub fn subscribe_named(&self, name: &str, callback: Callback<T>) -> Result<Subscription> {
        self.ensure_live()?;
        match name.parse::<ViewKind>() {
            Ok(kind) => self.subscribe(kind, callback),
            Err(err) => {
                tracing::warn!(%err, "ignoring subscription to unknown view");
                Ok(Subscription::noop())
            }
        }
    }

    /// Listen to changes in self presence
    pub fn on_self<F>(&self, f: F) -> Result<Subscription>
    where
        F: Fn(&User<T>) + 'static,
    {
        self.subscribe(
            ViewKind::Local,
            callback(move |view: View<'_, T>| {
                if let Some(user) = view.user() {
                    f(user);
                }
            }),
        )
    }

    /// Listen to changes in other users' presence
    pub fn on_others<F>(&self, f: F) -> Result<Subscription>
    where
        F: Fn(&[User<T>]) + 'static,
    {
        self.subscribe(ViewKind::Others, list_callback(f))
    }

    /// Listen to changes in any user's presence
    pub fn on_users<F>(&self, f: F) -> Result<Subscription>
    where
        F: Fn(&[User<T>]) + 'static,
    {
        self.subscribe(ViewKind::Users, list_callback(f))
    }

    /// Remove the first registration of `callback` for `kind`; no-op if absent
    pub fn unsubscribe(&self, kind: ViewKind, callback: &Callback<T>) {
        self.inner
            .listeners
            .borrow_mut()
            .remove_callback(kind, callback);
    }

    pub fn listener_count(&self, kind: ViewKind) -> usize {
        self.inner.listeners.borrow().slot(kind).len()
    }

    /// Clear the local presence so peers see us leave, detach from awareness
    /// and drop every listener. No dispatch happens afterwards
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        let awareness = &self.inner.awareness;
        if let Some(id) = self.inner.handler.take() {
            awareness.off_change(id);
        }
        awareness.set_local_state(None);
        self.inner.listeners.borrow_mut().clear();
        if self.inner.options.owns_awareness {
            awareness.destroy();
        }
        tracing::debug!(local_id = awareness.local_id(), "room destroyed");
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(PresenceError::Destroyed);
        }
        Ok(())
    }

    fn handle_change(&self, change: &AwarenessChange, origin: &Origin) {
        if self.is_destroyed() {
            return;
        }
        tracing::trace!(
            local_id = self.local_id(),
            %origin,
            added = ?change.added,
            updated = ?change.updated,
            removed = ?change.removed,
            "awareness change"
        );

        if self.has_listeners(ViewKind::Users) {
            let users = self.get_users();
            self.dispatch(ViewKind::Users, View::Users(&users));
        }

        if origin.is_local() {
            if self.has_listeners(ViewKind::Local) {
                let me = self.get_self();
                self.dispatch(ViewKind::Local, View::Local(&me));
            }
        } else if self.has_listeners(ViewKind::Others) {
            let others = self.get_others();
            self.dispatch(ViewKind::Others, View::Others(&others));
        }
    }

    fn has_listeners(&self, kind: ViewKind) -> bool {
        !self.inner.listeners.borrow().slot(kind).is_empty()
    }

    fn dispatch(&self, kind: ViewKind, view: View<'_, T>) {
        // Listeners may (un)subscribe while we iterate
        let callbacks = self.inner.listeners.borrow().snapshot(kind);
        for callback in callbacks {
            if self.is_destroyed() {
                return;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(view))) {
                tracing::error!(
                    view = %kind,
                    error = panic_message(&*payload),
                    "presence listener panicked"
                );
            }
        }
    }
}

impl<T: Presence, B: AwarenessBackend + 'static> fmt::Debug for Room<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.inner.listeners.borrow();
        f.debug_struct("Room")
            .field("local_id", &self.local_id())
            .field("destroyed", &self.is_destroyed())
            .field("self_listeners", &listeners.local.len())
            .field("others_listeners", &listeners.others.len())
            .field("users_listeners", &listeners.users.len())
            .finish()
    }
}

/// Non-owning room handle, for listeners that must not keep the room alive
pub struct WeakRoom<T: Presence, B: AwarenessBackend + 'static = Awareness> {
    inner: Weak<RoomInner<T, B>>,
}

impl<T: Presence, B: AwarenessBackend + 'static> WeakRoom<T, B> {
    pub fn upgrade(&self) -> Option<Room<T, B>> {
        self.inner.upgrade().map(|inner| Room { inner })
    }
}

impl<T: Presence, B: AwarenessBackend + 'static> Clone for WeakRoom<T, B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn list_callback<T, F>(f: F) -> Callback<T>
where
    F: Fn(&[User<T>]) + 'static,
{
    callback(move |view: View<'_, T>| {
        if let Some(users) = view.users() {
            f(users);
        }
    })
}

fn to_state<P: Serialize + ?Sized>(presence: &P) -> Result<PresenceState> {
    match serde_json::to_value(presence)? {
        Value::Object(state) => Ok(state),
        Value::Null => Err(PresenceError::NotAnObject("null")),
        Value::Bool(_) => Err(PresenceError::NotAnObject("boolean")),
        Value::Number(_) => Err(PresenceError::NotAnObject("number")),
        Value::String(_) => Err(PresenceError::NotAnObject("string")),
        Value::Array(_) => Err(PresenceError::NotAnObject("array")),
    }
}

fn decode<T: Presence>(id: ConnectionId, state: PresenceState) -> Option<T> {
    match serde_json::from_value(Value::Object(state)) {
        Ok(presence) => Some(presence),
        Err(err) => {
            tracing::debug!(id, %err, "presence does not match the expected shape");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awareness::{AwarenessEntry, AwarenessUpdate};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        x: i32,
        y: i32,
    }

    fn remote(awareness: &Awareness, client_id: ConnectionId, clock: u64, state: Option<Value>) {
        awareness.apply_update(
            AwarenessUpdate {
                entries: vec![AwarenessEntry {
                    client_id,
                    clock,
                    state: state.and_then(|value| value.as_object().cloned()),
                }],
            },
            Origin::Remote,
        );
    }

    fn room(initial: Cursor) -> (Rc<Awareness>, Room<Cursor>) {
        let awareness = Rc::new(Awareness::new(1));
        let room = Room::new(awareness.clone(), Some(initial)).unwrap();
        (awareness, room)
    }

    #[test]
    fn test_view_kind_parsing() {
        for kind in ViewKind::ALL {
            assert_eq!(kind.as_str().parse::<ViewKind>(), Ok(kind));
        }
        assert!("everyone".parse::<ViewKind>().is_err());
        assert_eq!(serde_json::to_string(&ViewKind::Local).unwrap(), "\"self\"");
    }

    #[test]
    fn test_initial_presence_is_written() {
        let (awareness, room) = room(Cursor { x: 1, y: 2 });
        assert_eq!(
            awareness.local_state().map(Value::Object),
            Some(json!({"x": 1, "y": 2}))
        );
        assert_eq!(room.get_self().presence, Some(Cursor { x: 1, y: 2 }));
    }

    #[test]
    fn test_minimal_record_without_initial_presence() {
        let awareness = Rc::new(Awareness::new(7));
        let room: Room<Value> = Room::new(awareness.clone(), None).unwrap();

        assert_eq!(room.get_self().presence, Some(json!({"id": 7})));

        // A typed room cannot decode the minimal record
        let awareness = Rc::new(Awareness::new(7));
        let typed: Room<Cursor> = Room::new(awareness, None).unwrap();
        assert_eq!(typed.get_self(), User { id: 7, presence: None });
    }

    #[test]
    fn test_rejects_non_object_presence() {
        let awareness = Rc::new(Awareness::new(1));
        let err = Room::<Value>::new(awareness, Some(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, PresenceError::NotAnObject("array")));
    }

    #[test]
    fn test_two_user_scenario() {
        let (awareness, room) = room(Cursor { x: 0, y: 0 });
        remote(&awareness, 2, 1, Some(json!({"x": 5, "y": 5})));

        assert_eq!(
            room.get_self(),
            User {
                id: 1,
                presence: Some(Cursor { x: 0, y: 0 })
            }
        );
        assert_eq!(
            room.get_others(),
            vec![User {
                id: 2,
                presence: Some(Cursor { x: 5, y: 5 })
            }]
        );
        let ids: Vec<_> = room.get_users().iter().map(|user| user.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_local_change_notifies_self_not_others() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let selves = Rc::new(RefCell::new(Vec::new()));
        let others = Rc::new(Cell::new(0));

        let sink = selves.clone();
        let _s = room.on_self(move |me| sink.borrow_mut().push(me.clone())).unwrap();
        let count = others.clone();
        let _o = room.on_others(move |_| count.set(count.get() + 1)).unwrap();

        room.set_presence(&Cursor { x: 3, y: 4 }).unwrap();

        assert_eq!(
            *selves.borrow(),
            vec![User {
                id: 1,
                presence: Some(Cursor { x: 3, y: 4 })
            }]
        );
        assert_eq!(others.get(), 0);
    }

    #[test]
    fn test_remote_change_notifies_others_not_self() {
        let (awareness, room) = room(Cursor { x: 0, y: 0 });
        let selves = Rc::new(Cell::new(0));
        let others = Rc::new(RefCell::new(Vec::new()));

        let count = selves.clone();
        let _s = room.on_self(move |_| count.set(count.get() + 1)).unwrap();
        let sink = others.clone();
        let _o = room
            .on_others(move |users| sink.borrow_mut().push(users.to_vec()))
            .unwrap();

        remote(&awareness, 2, 1, Some(json!({"x": 9, "y": 9})));

        assert_eq!(selves.get(), 0);
        assert_eq!(others.borrow().len(), 1);
        assert_eq!(others.borrow()[0][0].id, 2);
    }

    #[test]
    fn test_users_listener_fires_for_every_origin() {
        let (awareness, room) = room(Cursor { x: 0, y: 0 });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _u = room
            .on_users(move |users| sink.borrow_mut().push(users.len()))
            .unwrap();

        room.set_presence(&Cursor { x: 1, y: 1 }).unwrap();
        remote(&awareness, 2, 1, Some(json!({"x": 2, "y": 2})));

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_update_presence_merges_fields() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let events = Rc::new(Cell::new(0));
        let count = events.clone();
        let _s = room.on_self(move |_| count.set(count.get() + 1)).unwrap();

        room.update_presence(&json!({"x": 5})).unwrap();

        assert_eq!(room.get_self().presence, Some(Cursor { x: 5, y: 0 }));
        assert_eq!(events.get(), 1);
    }

    #[test]
    fn test_update_presence_with_empty_partial_is_noop() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let events = Rc::new(Cell::new(0));
        let count = events.clone();
        let _u = room.on_users(move |_| count.set(count.get() + 1)).unwrap();

        room.update_presence(&json!({})).unwrap();
        assert_eq!(events.get(), 0);
        assert!(matches!(
            room.update_presence(&5),
            Err(PresenceError::NotAnObject("number"))
        ));
    }

    #[test]
    fn test_unsubscribe_handle_is_idempotent() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let events = Rc::new(Cell::new(0));
        let count = events.clone();
        let subscription = room.on_self(move |_| count.set(count.get() + 1)).unwrap();

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());

        room.set_presence(&Cursor { x: 1, y: 0 }).unwrap();
        assert_eq!(events.get(), 0);
        assert_eq!(room.listener_count(ViewKind::Local), 0);
    }

    #[test]
    fn test_duplicate_registrations_are_independent() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let events = Rc::new(Cell::new(0));
        let count = events.clone();
        let shared: Callback<Cursor> = callback(move |_| count.set(count.get() + 1));

        let first = room.subscribe(ViewKind::Local, shared.clone()).unwrap();
        let _second = room.subscribe(ViewKind::Local, shared.clone()).unwrap();

        room.set_presence(&Cursor { x: 1, y: 0 }).unwrap();
        assert_eq!(events.get(), 2);

        first.unsubscribe();
        first.unsubscribe();
        room.set_presence(&Cursor { x: 2, y: 0 }).unwrap();
        assert_eq!(events.get(), 3);
    }

    #[test]
    fn test_unsubscribe_by_callback() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let registered: Callback<Cursor> = callback(|_| {});
        let stranger: Callback<Cursor> = callback(|_| {});

        let _a = room.subscribe(ViewKind::Users, registered.clone()).unwrap();
        let _b = room.subscribe(ViewKind::Users, registered.clone()).unwrap();

        room.unsubscribe(ViewKind::Users, &stranger);
        room.unsubscribe(ViewKind::Others, &registered);
        assert_eq!(room.listener_count(ViewKind::Users), 2);

        room.unsubscribe(ViewKind::Users, &registered);
        assert_eq!(room.listener_count(ViewKind::Users), 1);
    }

    #[test]
    fn test_unknown_view_name_yields_noop() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let subscription = room.subscribe_named("everyone", callback(|_| {})).unwrap();
        assert!(!subscription.is_active());
        subscription.unsubscribe();

        let subscription = room.subscribe_named("others", callback(|_| {})).unwrap();
        assert!(subscription.is_active());
        assert_eq!(room.listener_count(ViewKind::Others), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_siblings() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let events = Rc::new(Cell::new(0));

        let _bad = room.on_self(|_| panic!("listener failure")).unwrap();
        let count = events.clone();
        let _good = room.on_self(move |_| count.set(count.get() + 1)).unwrap();

        room.set_presence(&Cursor { x: 1, y: 1 }).unwrap();
        room.set_presence(&Cursor { x: 2, y: 2 }).unwrap();

        assert_eq!(events.get(), 2);
    }

    #[test]
    fn test_subscribing_during_dispatch_is_safe() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let events = Rc::new(Cell::new(0));

        let handle = room.clone();
        let count = events.clone();
        let _s = room
            .on_self(move |_| {
                let count = count.clone();
                // Leaked on purpose: takes effect from the next change on
                let _ = handle.on_self(move |_| count.set(count.get() + 1));
            })
            .unwrap();

        room.set_presence(&Cursor { x: 1, y: 0 }).unwrap();
        assert_eq!(events.get(), 0);
        assert_eq!(room.listener_count(ViewKind::Local), 2);

        room.set_presence(&Cursor { x: 2, y: 0 }).unwrap();
        assert_eq!(events.get(), 1);
    }

    #[test]
    fn test_unsubscribing_during_dispatch_takes_effect_next_change() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });
        let victim_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot = victim_slot.clone();
        let _remover = room
            .on_self(move |_| {
                if let Some(victim) = slot.borrow().as_ref() {
                    victim.unsubscribe();
                }
            })
            .unwrap();

        let victim_events = Rc::new(Cell::new(0));
        let count = victim_events.clone();
        let victim = room.on_self(move |_| count.set(count.get() + 1)).unwrap();
        *victim_slot.borrow_mut() = Some(victim);

        // The pass already in flight still reaches the victim
        room.set_presence(&Cursor { x: 1, y: 0 }).unwrap();
        assert_eq!(room.listener_count(ViewKind::Local), 1);
        assert_eq!(victim_events.get(), 1);

        room.set_presence(&Cursor { x: 2, y: 0 }).unwrap();
        assert_eq!(victim_events.get(), 1);
    }

    #[test]
    fn test_destroy_during_dispatch_skips_remaining_listeners() {
        let (_awareness, room) = room(Cursor { x: 0, y: 0 });

        let handle = room.clone();
        let _destroyer = room.on_self(move |_| handle.destroy()).unwrap();
        let later = Rc::new(Cell::new(0));
        let count = later.clone();
        let _later = room.on_self(move |_| count.set(count.get() + 1)).unwrap();

        room.set_presence(&Cursor { x: 1, y: 0 }).unwrap();

        assert!(room.is_destroyed());
        assert_eq!(later.get(), 0);
        assert_eq!(room.listener_count(ViewKind::Local), 0);
    }

    #[test]
    fn test_remote_write_to_local_entry_is_reported_as_remote() {
        let (awareness, room) = room(Cursor { x: 0, y: 0 });
        let self_events = Rc::new(Cell::new(0));
        let count = self_events.clone();
        let _s = room.on_self(move |_| count.set(count.get() + 1)).unwrap();
        let users_events = Rc::new(Cell::new(0));
        let count = users_events.clone();
        let _u = room.on_users(move |_| count.set(count.get() + 1)).unwrap();

        // Peers are assumed never to publish our id; if one does, the newer
        // clock wins and the change carries the remote origin
        remote(&awareness, 1, 50, Some(json!({"x": 9, "y": 9})));

        assert_eq!(room.get_self().presence, Some(Cursor { x: 9, y: 9 }));
        assert_eq!(self_events.get(), 0);
        assert_eq!(users_events.get(), 1);
        assert!(room.get_others().is_empty());
    }

    #[test]
    fn test_destroy_clears_presence_and_stops_dispatch() {
        let awareness = Rc::new(Awareness::new(1));
        let room = Room::with_options(
            awareness.clone(),
            Some(Cursor { x: 0, y: 0 }),
            RoomOptions::default().owns_awareness(false),
        )
        .unwrap();
        let events = Rc::new(Cell::new(0));
        let count = events.clone();
        let _u = room.on_users(move |_| count.set(count.get() + 1)).unwrap();

        room.destroy();
        room.destroy();

        assert!(room.is_destroyed());
        assert!(awareness.local_state().is_none());
        assert_eq!(room.listener_count(ViewKind::Users), 0);
        assert!(!awareness.is_destroyed());

        remote(&awareness, 2, 1, Some(json!({"x": 1, "y": 1})));
        assert_eq!(events.get(), 0);

        assert!(matches!(
            room.set_presence(&Cursor { x: 1, y: 1 }),
            Err(PresenceError::Destroyed)
        ));
        assert!(matches!(
            room.on_self(|_| {}),
            Err(PresenceError::Destroyed)
        ));
    }

    #[test]
    fn test_destroy_owns_awareness_by_default() {
        let (awareness, room) = room(Cursor { x: 0, y: 0 });
        room.destroy();
        assert!(awareness.is_destroyed());
    }

    #[test]
    fn test_dropping_room_detaches_handler() {
        let awareness = Rc::new(Awareness::new(1));
        let room: Room<Cursor> = Room::new(awareness.clone(), Some(Cursor { x: 0, y: 0 })).unwrap();
        let weak = room.downgrade();
        drop(room);

        assert!(weak.upgrade().is_none());
        // Presence is left in place; only destroy() announces departure
        assert!(awareness.local_state().is_some());
        awareness.set_local_state(None);
    }
}
