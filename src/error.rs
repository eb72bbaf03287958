use thiserror::Error;

use crate::audio::TrackIndex;

/// Why a single wire record could not be turned into an [`Event`](crate::Event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordFault {
    #[error("record is shorter than {} bytes", crate::codec::RECORD_SIZE)]
    Truncated,
    #[error("unknown event kind tag {0}")]
    UnknownKind(u8),
    #[error("channel {0} is out of range (0-15)")]
    ChannelOutOfRange(u8),
    #[error("data byte {0} is out of range (0-127)")]
    DataOutOfRange(u8),
}

/// Errors reported by the control-thread API of the scheduler.
///
/// None of these ever reach the render path: the renderer treats every
/// reachable state as renderable (a missing voice is silence, an empty queue
/// is no dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// No live track has this index.
    #[error("track {0} not found")]
    NotFound(TrackIndex),

    /// The track's event queue cannot take the whole batch.
    #[error("event queue full: {requested} events requested, {available} slots available")]
    CapacityExceeded { requested: usize, available: usize },

    /// A wire record could not be decoded.
    #[error("invalid event record: {0}")]
    InvalidRecord(RecordFault),

    /// The engine was never initialised or has already been shut down.
    #[error("engine is not ready")]
    NotReady,

    /// Every track slot is in use.
    #[error("track limit of {0} reached")]
    TrackLimit(usize),
}

pub type Result<T, E = SchedulerError> = std::result::Result<T, E>;
