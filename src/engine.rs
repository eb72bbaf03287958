//! Handle-based control surface.
//!
//! An [`EngineRegistry`] owns every scheduler it creates. Callers get an
//! opaque [`EngineHandle`] back from `init` and pass it to every other call;
//! the handle borrows nothing and owns nothing. Failures come back as plain
//! sentinels (`false`, `-1`, `0`) and are logged, so this layer can sit
//! directly behind a foreign-function or scripting boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::audio::{OutputTarget, TrackIndex, Voice};
use crate::codec::{self, RECORD_SIZE};
use crate::config::{ConfigError, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::timing::{Renderer, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u32);

impl EngineHandle {
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

pub struct EngineRegistry {
    engines: Mutex<HashMap<EngineHandle, Scheduler>>,
    next_handle: AtomicU32,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    /// Creates an engine with the default configuration.
    ///
    /// The returned [`Renderer`] belongs to whoever drives audio: hand it to
    /// an audio callback or call it from a render loop.
    pub fn init(
        &self,
        output: Box<dyn OutputTarget>,
        sample_rate: u32,
    ) -> Result<(EngineHandle, Renderer), ConfigError> {
        self.init_with_config(SchedulerConfig::default(), output, sample_rate)
    }

    pub fn init_with_config(
        &self,
        config: SchedulerConfig,
        output: Box<dyn OutputTarget>,
        sample_rate: u32,
    ) -> Result<(EngineHandle, Renderer), ConfigError> {
        let (scheduler, renderer) = Scheduler::new(config, sample_rate, output)?;
        let handle = EngineHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.engines.lock().insert(handle, scheduler);

        info!(handle = handle.raw(), sample_rate, "engine initialized");
        Ok((handle, renderer))
    }

    /// Shuts the engine down and forgets the handle. The renderer handed out
    /// by `init` keeps producing silence until it is dropped.
    pub fn destroy(&self, handle: EngineHandle) -> bool {
        let Some(scheduler) = self.engines.lock().remove(&handle) else {
            warn!(handle = handle.raw(), "destroy: unknown engine handle");
            return false;
        };
        scheduler.shutdown();
        info!(handle = handle.raw(), "engine destroyed");
        true
    }

    /// Typed access to the engine behind `handle`.
    pub fn scheduler(&self, handle: EngineHandle) -> Option<Scheduler> {
        self.engines.lock().get(&handle).cloned()
    }

    pub fn len(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `operation` against the engine, logging any failure under `op`.
    fn call<T>(
        &self,
        op: &'static str,
        handle: EngineHandle,
        operation: impl FnOnce(&Scheduler) -> Result<T>,
    ) -> Option<T> {
        let result = self
            .scheduler(handle)
            .ok_or(SchedulerError::NotReady)
            .and_then(|scheduler| operation(&scheduler));

        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(handle = handle.raw(), op, %err, "engine call failed");
                None
            }
        }
    }

    /// Like [`call`](Self::call) for operations keyed by a track index.
    fn call_track<T>(
        &self,
        op: &'static str,
        handle: EngineHandle,
        index: i32,
        operation: impl FnOnce(&Scheduler, TrackIndex) -> Result<T>,
    ) -> Option<T> {
        self.call(op, handle, |scheduler| {
            let index = TrackIndex::try_from(index)
                .map_err(|_| SchedulerError::NotFound(TrackIndex::MAX))?;
            operation(scheduler, index)
        })
    }

    /// Reserves a track with no voice. Returns its index, or -1.
    pub fn add_track(&self, handle: EngineHandle) -> i32 {
        self.call("add_track", handle, |scheduler| scheduler.add_track())
            .and_then(|index| i32::try_from(index).ok())
            .unwrap_or(-1)
    }

    pub fn set_track_voice(&self, handle: EngineHandle, index: i32, voice: Arc<dyn Voice>) -> bool {
        self.call_track("set_track_voice", handle, index, |scheduler, index| {
            scheduler.set_track_voice(index, voice)
        })
        .is_some()
    }

    pub fn remove_track(&self, handle: EngineHandle, index: i32) -> bool {
        self.call_track("remove_track", handle, index, |scheduler, index| {
            scheduler.remove_track(index)
        })
        .is_some()
    }

    pub fn reset_track(&self, handle: EngineHandle, index: i32) -> bool {
        self.call_track("reset_track", handle, index, |scheduler, index| {
            scheduler.reset_track(index)
        })
        .is_some()
    }

    /// Decodes `count` wire records from `bytes` and queues them. Returns the
    /// number accepted; malformed records are queued as no-ops.
    pub fn add_events(&self, handle: EngineHandle, index: i32, bytes: &[u8], count: u32) -> u32 {
        self.call_track("add_events", handle, index, |scheduler, index| {
            // padding past the free slots would be rejected anyway
            let available = scheduler.buffer_available_count(index)?;
            let count = (count as usize).min(bytes.len() / RECORD_SIZE + available);
            let events = codec::decode(bytes, count);
            scheduler.add_events(index, &events)
        })
        .map_or(0, |accepted| accepted as u32)
    }

    pub fn handle_events_now(
        &self,
        handle: EngineHandle,
        index: i32,
        bytes: &[u8],
        count: u32,
    ) -> bool {
        self.call_track("handle_events_now", handle, index, |scheduler, index| {
            let count = (count as usize).min(bytes.len() / RECORD_SIZE);
            let events = codec::decode(bytes, count);
            scheduler.handle_events_now(index, &events)
        })
        .is_some()
    }

    pub fn clear_events(&self, handle: EngineHandle, index: i32, from_frame: u64) -> bool {
        self.call_track("clear_events", handle, index, |scheduler, index| {
            scheduler.clear_events(index, from_frame)
        })
        .is_some()
    }

    pub fn play(&self, handle: EngineHandle) -> bool {
        self.call("play", handle, Scheduler::play).is_some()
    }

    pub fn pause(&self, handle: EngineHandle) -> bool {
        self.call("pause", handle, Scheduler::pause).is_some()
    }

    pub fn get_position(&self, handle: EngineHandle) -> u64 {
        self.call("get_position", handle, |scheduler| Ok(scheduler.position()))
            .unwrap_or(0)
    }

    pub fn get_track_volume(&self, handle: EngineHandle, index: i32) -> f32 {
        self.call_track("get_track_volume", handle, index, |scheduler, index| {
            scheduler.track_volume(index)
        })
        .unwrap_or(0.0)
    }

    pub fn set_track_volume(&self, handle: EngineHandle, index: i32, volume: f32) -> bool {
        self.call_track("set_track_volume", handle, index, |scheduler, index| {
            scheduler.set_track_volume(index, volume)
        })
        .is_some()
    }

    pub fn get_buffer_available_count(&self, handle: EngineHandle, index: i32) -> u32 {
        self.call_track(
            "get_buffer_available_count",
            handle,
            index,
            |scheduler, index| scheduler.buffer_available_count(index),
        )
        .map_or(0, |available| available as u32)
    }

    pub fn get_last_render_time_us(&self, handle: EngineHandle) -> u64 {
        self.call("get_last_render_time_us", handle, |scheduler| {
            Ok(scheduler.last_render_time_us())
        })
        .unwrap_or(0)
    }
}

impl Drop for EngineRegistry {
    fn drop(&mut self) {
        for (_, scheduler) in self.engines.get_mut().drain() {
            scheduler.shutdown();
        }
    }
}
