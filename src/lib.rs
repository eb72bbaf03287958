//! Multi-track, sample-accurate event scheduling for audio renderers.
//!
//! Control threads queue frame-stamped [`Event`]s per track through a
//! [`Scheduler`]; the audio thread pulls mixed frames out of the matching
//! [`Renderer`], which dispatches each event to its track's [`Voice`] at the
//! exact frame it was scheduled for.

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod timing;

pub use audio::{NullOutput, OutputTarget, TrackIndex, Voice};
pub use config::{ConfigError, SchedulerConfig};
pub use engine::{EngineHandle, EngineRegistry};
pub use error::{RecordFault, SchedulerError};
pub use events::{Event, EventKind, TriggerFrame};
pub use timing::{Renderer, Scheduler, TransportState};
