//! Configuration for awareness instances and rooms
//!
//! Both types implement `Default` and `Deserialize`, so they can be embedded
//! in an application's own settings file. Durations are expressed in
//! milliseconds on the wire.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for marking remote clients offline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Heartbeat interval (renew local state even if nothing changed)
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Settings for the in-memory [`Awareness`](crate::awareness::Awareness)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwarenessConfig {
    /// Remote clients not renewed within this window are removed
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,

    /// Local state is renewed once it is older than this
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
}

impl AwarenessConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

impl Default for AwarenessConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Settings for a [`Room`](crate::room::Room)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomOptions {
    /// Destroy the awareness collaborator together with the room
    pub owns_awareness: bool,
}

impl RoomOptions {
    pub fn owns_awareness(mut self, owns: bool) -> Self {
        self.owns_awareness = owns;
        self
    }
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            owns_awareness: true,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
