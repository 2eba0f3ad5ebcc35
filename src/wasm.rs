//! JavaScript bindings for rooms
//!
//! Exposes a [`Room`] over the in-memory [`Awareness`] to JavaScript. Presence
//! values and views cross the boundary as JSON strings; peers exchange
//! awareness updates through `encodeUpdate` / `applyUpdate`.

use crate::awareness::{Awareness, AwarenessBackend, AwarenessUpdate, Origin};
use crate::room::{callback, Room, Subscription, View};
use serde_json::Value;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

/// Initialize panic hook for better error messages in browser
#[wasm_bindgen(js_name = initPanicHook)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

fn js_error(context: &str, err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&format!("{}: {}", context, err))
}

/// JavaScript-friendly wrapper for a room
#[wasm_bindgen]
pub struct WasmRoom {
    inner: Room<Value>,
}

#[wasm_bindgen]
impl WasmRoom {
    /// Create a room for `client_id` (pass initial presence as a JSON string)
    #[wasm_bindgen(constructor)]
    pub fn new(client_id: u64, initial_json: Option<String>) -> Result<WasmRoom, JsValue> {
        let initial = initial_json
            .map(|json| serde_json::from_str::<Value>(&json))
            .transpose()
            .map_err(|e| js_error("Invalid JSON", e))?;

        let awareness = Rc::new(Awareness::new(client_id));
        let inner = Room::new(awareness, initial).map_err(|e| js_error("Room creation failed", e))?;
        Ok(Self { inner })
    }

    /// Get the local client ID
    #[wasm_bindgen(js_name = getClientId)]
    pub fn get_client_id(&self) -> u64 {
        self.inner.local_id()
    }

    /// Local user as JSON string
    #[wasm_bindgen(js_name = getSelf)]
    pub fn get_self(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.inner.get_self())
            .map_err(|e| js_error("Serialization failed", e))
    }

    /// Other users as JSON array string
    #[wasm_bindgen(js_name = getOthers)]
    pub fn get_others(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.inner.get_others())
            .map_err(|e| js_error("Serialization failed", e))
    }

    /// All users as JSON array string
    #[wasm_bindgen(js_name = getUsers)]
    pub fn get_users(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.inner.get_users())
            .map_err(|e| js_error("Serialization failed", e))
    }

    /// Replace local presence (pass JSON string)
    #[wasm_bindgen(js_name = setPresence)]
    pub fn set_presence(&self, presence_json: String) -> Result<(), JsValue> {
        let presence: Value =
            serde_json::from_str(&presence_json).map_err(|e| js_error("Invalid JSON", e))?;
        self.inner
            .set_presence(&presence)
            .map_err(|e| js_error("setPresence failed", e))
    }

    /// Merge fields into local presence (pass JSON string)
    #[wasm_bindgen(js_name = updatePresence)]
    pub fn update_presence(&self, partial_json: String) -> Result<(), JsValue> {
        let partial: Value =
            serde_json::from_str(&partial_json).map_err(|e| js_error("Invalid JSON", e))?;
        self.inner
            .update_presence(&partial)
            .map_err(|e| js_error("updatePresence failed", e))
    }

    /// Listen to "self", "others" or "users"; the callback receives a JSON string
    #[wasm_bindgen(js_name = subscribe)]
    pub fn subscribe(
        &self,
        view: String,
        listener: js_sys::Function,
    ) -> Result<WasmSubscription, JsValue> {
        let subscription = self
            .inner
            .subscribe_named(
                &view,
                callback(move |view: View<'_, Value>| {
                    let json = match view {
                        View::Local(user) => serde_json::to_string(user),
                        View::Others(users) | View::Users(users) => serde_json::to_string(users),
                    };
                    match json {
                        Ok(json) => {
                            if let Err(err) = listener.call1(&JsValue::NULL, &JsValue::from_str(&json)) {
                                tracing::error!(?err, "javascript presence listener threw");
                            }
                        }
                        Err(err) => tracing::error!(%err, "failed to serialize presence view"),
                    }
                }),
            )
            .map_err(|e| js_error("subscribe failed", e))?;
        Ok(WasmSubscription {
            inner: subscription,
        })
    }

    /// Encode the local entry for broadcast (JSON string)
    #[wasm_bindgen(js_name = encodeUpdate)]
    pub fn encode_update(&self) -> Result<String, JsValue> {
        let awareness = self.inner.awareness();
        awareness
            .encode_update(&[awareness.local_id()])
            .to_json()
            .map_err(|e| js_error("Serialization failed", e))
    }

    /// Apply a peer's awareness update (pass JSON string). Returns an update
    /// to broadcast when a peer wrongly announced our departure
    #[wasm_bindgen(js_name = applyUpdate)]
    pub fn apply_update(&self, update_json: String) -> Result<Option<String>, JsValue> {
        let update =
            AwarenessUpdate::from_json(&update_json).map_err(|e| js_error("Invalid update JSON", e))?;
        self.inner
            .awareness()
            .apply_update(update, Origin::Remote)
            .map(|reply| reply.to_json())
            .transpose()
            .map_err(|e| js_error("Serialization failed", e))
    }

    /// Leave the room
    #[wasm_bindgen(js_name = destroy)]
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

/// Handle returned by `WasmRoom.subscribe`
#[wasm_bindgen]
pub struct WasmSubscription {
    inner: Subscription,
}

#[wasm_bindgen]
impl WasmSubscription {
    #[wasm_bindgen(js_name = unsubscribe)]
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }
}
