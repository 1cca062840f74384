//! Status cache shared between the poll loop and its readers.
//!
//! The poll loop is the only writer. Readers copy values out under the lock;
//! nothing holds a reference into the cache once the lock is released. Each
//! critical section is a string copy or a flag flip; no device access or
//! checksum work happens while the lock is held.
//!
//! Consumers learn about updates either by polling the per-kind changed
//! flags or by subscribing to [`CacheEvent`]s.

use crate::mode::OperatingMode;
use crate::query::QueryKind;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Default capacity of the change-event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

const KIND_COUNT: usize = QueryKind::ALL.len();

/// Change notification published after a cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// A payload slot was overwritten.
    Updated(QueryKind),
    /// The operating mode moved from one known mode to a different one.
    ModeChanged {
        from: OperatingMode,
        to: OperatingMode,
    },
}

#[derive(Debug, Default)]
struct CacheState {
    payloads: [Option<String>; KIND_COUNT],
    changed: [bool; KIND_COUNT],
    /// Raw `QMOD` mode character.
    mode: Option<u8>,
    mode_changed: bool,
}

/// Most recent payload per query kind plus the decoded operating mode.
#[derive(Debug)]
pub struct StatusCache {
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,
}

impl StatusCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::with_event_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Creates an empty cache whose event channel holds `capacity` events.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(CacheState::default()),
            events,
        }
    }

    /// Overwrites the payload for `kind` and marks it changed.
    ///
    /// A `Mode` payload also updates the operating mode from its first
    /// character. A transition is flagged only when the previous mode was
    /// known and differs from the new one.
    pub fn update(&self, kind: QueryKind, payload: impl Into<String>) {
        let payload = payload.into();
        let mode_code = match kind {
            QueryKind::Mode => payload.bytes().next(),
            _ => None,
        };

        let transition = {
            let mut state = self.state.lock();
            let transition = mode_code.and_then(|code| {
                let from = state.mode.map_or(OperatingMode::Unknown, OperatingMode::from_code);
                let to = OperatingMode::from_code(code);
                state.mode = Some(code);
                (from.is_known() && from != to).then_some((from, to))
            });
            if transition.is_some() {
                state.mode_changed = true;
            }
            state.payloads[kind.index()] = Some(payload);
            state.changed[kind.index()] = true;
            transition
        };

        // No receivers is fine
        let _ = self.events.send(CacheEvent::Updated(kind));
        if let Some((from, to)) = transition {
            tracing::debug!(%from, %to, "Mode transition recorded");
            let _ = self.events.send(CacheEvent::ModeChanged { from, to });
        }
    }

    /// Returns a copy of the latest payload for `kind`.
    pub fn snapshot(&self, kind: QueryKind) -> Option<String> {
        self.state.lock().payloads[kind.index()].clone()
    }

    /// Decodes the stored mode character.
    pub fn decode_mode(&self) -> OperatingMode {
        let code = self.state.lock().mode;
        code.map_or(OperatingMode::Unknown, OperatingMode::from_code)
    }

    /// Raw mode character as last reported by the device.
    pub fn raw_mode(&self) -> Option<char> {
        self.state.lock().mode.map(char::from)
    }

    /// Returns whether `kind` was written since it was last consumed.
    pub fn is_changed(&self, kind: QueryKind) -> bool {
        self.state.lock().changed[kind.index()]
    }

    /// Consumes the changed flag for `kind`.
    pub fn take_changed(&self, kind: QueryKind) -> bool {
        std::mem::take(&mut self.state.lock().changed[kind.index()])
    }

    /// Consumes the changed flags of `kinds` only if all of them are set.
    pub fn take_all_changed(&self, kinds: &[QueryKind]) -> bool {
        let mut state = self.state.lock();
        if !kinds.iter().all(|kind| state.changed[kind.index()]) {
            return false;
        }
        for kind in kinds {
            state.changed[kind.index()] = false;
        }
        true
    }

    /// Consumes the mode-transition flag.
    pub fn take_mode_changed(&self) -> bool {
        std::mem::take(&mut self.state.lock().mode_changed)
    }

    /// Subscribes to change events published after each write.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}
