//! Injected view of the host platform.
//!
//! The connection manager never queries the platform directly. Foreground
//! and network status, the locally stored profile, and the playback markers
//! all come through [`Environment`], so tests drive them deterministically.

use parking_lot::RwLock;
use serde_json::Value;

/// Platform transitions the manager reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// App came back to the foreground.
    Foreground,
    Background,
    /// Network connectivity returned.
    Online,
    Offline,
}

impl LifecycleSignal {
    /// Whether this signal should trigger a connection re-check.
    pub fn revalidates(self) -> bool {
        matches!(self, LifecycleSignal::Foreground | LifecycleSignal::Online)
    }
}

/// Last known playback, owned by the embedding application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackMarkers {
    pub time: Option<f64>,
    pub state: Option<Value>,
}

/// Host platform capabilities consumed by the core. All read-only.
pub trait Environment: Send + Sync {
    fn is_foreground(&self) -> bool;

    fn is_online(&self) -> bool;

    /// The locally stored profile blob, if any.
    fn load_profile(&self) -> Option<Value>;

    fn playback_markers(&self) -> PlaybackMarkers {
        PlaybackMarkers::default()
    }

    /// The profile's user id, used as fallback identity.
    ///
    /// Accepts a string or numeric `user_id`; empty strings count as absent.
    fn profile_user_id(&self) -> Option<String> {
        let profile = self.load_profile()?;
        match profile.get("user_id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// In-memory environment whose values can be changed at runtime.
///
/// Used by the CLI and by tests.
#[derive(Debug)]
pub struct StaticEnvironment {
    foreground: RwLock<bool>,
    online: RwLock<bool>,
    profile: RwLock<Option<Value>>,
    playback: RwLock<PlaybackMarkers>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self {
            foreground: RwLock::new(true),
            online: RwLock::new(true),
            profile: RwLock::new(None),
            playback: RwLock::new(PlaybackMarkers::default()),
        }
    }

    pub fn with_profile(self, profile: Value) -> Self {
        *self.profile.write() = Some(profile);
        self
    }

    pub fn set_foreground(&self, foreground: bool) {
        *self.foreground.write() = foreground;
    }

    pub fn set_online(&self, online: bool) {
        *self.online.write() = online;
    }

    pub fn set_profile(&self, profile: Option<Value>) {
        *self.profile.write() = profile;
    }

    pub fn set_playback(&self, markers: PlaybackMarkers) {
        *self.playback.write() = markers;
    }
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for StaticEnvironment {
    fn is_foreground(&self) -> bool {
        *self.foreground.read()
    }

    fn is_online(&self) -> bool {
        *self.online.read()
    }

    fn load_profile(&self) -> Option<Value> {
        self.profile.read().clone()
    }

    fn playback_markers(&self) -> PlaybackMarkers {
        self.playback.read().clone()
    }
}
