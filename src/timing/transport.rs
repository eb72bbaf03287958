use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl TransportState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }
}

/// Play/pause state shared between control threads and the render thread.
///
/// Transitions:
///
/// ```text
/// Stopped --play--> Playing --pause--> Paused --play--> Playing
///    ^                                                     |
///    +-------------------- stop (teardown) ----------------+
/// ```
#[derive(Debug)]
pub struct Transport {
    state: AtomicU8,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TransportState::Stopped as u8),
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.state() == TransportState::Playing
    }

    /// Returns `true` if the state changed.
    pub fn play(&self) -> bool {
        self.transition(|state| match state {
            TransportState::Stopped | TransportState::Paused => Some(TransportState::Playing),
            TransportState::Playing => None,
        })
    }

    /// Returns `true` if the state changed. Pausing while stopped does nothing.
    pub fn pause(&self) -> bool {
        self.transition(|state| match state {
            TransportState::Playing => Some(TransportState::Paused),
            TransportState::Paused | TransportState::Stopped => None,
        })
    }

    pub(crate) fn stop(&self) {
        self.state
            .store(TransportState::Stopped as u8, Ordering::Release);
    }

    fn transition(&self, next: impl Fn(TransportState) -> Option<TransportState>) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                next(TransportState::from_raw(raw)).map(|state| state as u8)
            })
            .is_ok()
    }
}
