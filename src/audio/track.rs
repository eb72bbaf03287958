use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use super::Voice;
use crate::events::{Event, EventKind, TriggerFrame};
use crate::timing::EventQueue;

pub type TrackIndex = usize;

const MIDI_NOTE_COUNT: u8 = 128;

/// Track state that outlives voice swaps: every table entry published for the
/// same index shares one of these.
pub struct TrackControls {
    /// f32 bits.
    volume: AtomicU32,
    /// Serializes control threads writing the same queue. Never taken by the
    /// render thread.
    producer: Mutex<()>,
    dropped_late: AtomicU64,
}

impl TrackControls {
    fn new(volume: f32) -> Self {
        Self {
            volume: AtomicU32::new(sanitize_volume(volume).to_bits()),
            producer: Mutex::new(()),
            dropped_late: AtomicU64::new(0),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(sanitize_volume(volume).to_bits(), Ordering::Relaxed);
    }

    /// Events discarded because they arrived too far behind the clock.
    pub fn dropped_late(&self) -> u64 {
        self.dropped_late.load(Ordering::Relaxed)
    }

    pub(crate) fn record_dropped_late(&self) {
        self.dropped_late.fetch_add(1, Ordering::Relaxed);
    }

    fn lock_producer(&self) -> MutexGuard<'_, ()> {
        self.producer.lock()
    }
}

fn sanitize_volume(volume: f32) -> f32 {
    if volume.is_nan() { 0.0 } else { volume.max(0.0) }
}

/// One scheduling lane: an event queue bound to an optional voice.
///
/// A track without a voice is "reserved": it accepts and drains events but
/// renders silence.
#[derive(Clone)]
pub struct Track {
    index: TrackIndex,
    queue: Arc<EventQueue>,
    controls: Arc<TrackControls>,
    voice: Option<Arc<dyn Voice>>,
}

impl Track {
    pub fn new(
        index: TrackIndex,
        queue_capacity: usize,
        volume: f32,
        voice: Option<Arc<dyn Voice>>,
    ) -> Self {
        Self {
            index,
            queue: Arc::new(EventQueue::with_capacity(queue_capacity)),
            controls: Arc::new(TrackControls::new(volume)),
            voice,
        }
    }

    pub fn with_voice(&self, voice: Option<Arc<dyn Voice>>) -> Self {
        Self {
            voice,
            ..self.clone()
        }
    }

    pub fn index(&self) -> TrackIndex {
        self.index
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn controls(&self) -> &TrackControls {
        &self.controls
    }

    pub fn voice(&self) -> Option<&Arc<dyn Voice>> {
        self.voice.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.voice.is_some()
    }

    pub fn volume(&self) -> f32 {
        self.controls.volume()
    }

    pub fn set_volume(&self, volume: f32) {
        self.controls.set_volume(volume);
    }

    pub fn add_events(&self, events: &[Event]) -> usize {
        let _producer = self.controls.lock_producer();
        self.queue.push(events)
    }

    /// Queues all of `events` or none of them. On failure returns the
    /// number of free slots.
    pub fn add_all_events(&self, events: &[Event]) -> Result<(), usize> {
        let _producer = self.controls.lock_producer();
        let available = self.queue.available_count();
        if events.len() > available {
            return Err(available);
        }
        self.queue.push(events);
        Ok(())
    }

    pub fn clear_from(&self, from_frame: u64) -> usize {
        let _producer = self.controls.lock_producer();
        self.queue.clear_from(from_frame)
    }

    /// Bypasses the queue. No-ops are skipped and not counted.
    pub fn handle_now(&self, events: &[Event]) -> usize {
        let mut dispatched = 0;
        for event in events.iter().filter(|event| !event.is_nop()) {
            self.dispatch(event, 0);
            dispatched += 1;
        }
        dispatched
    }

    /// Empties the queue, silences every note and resets the voice.
    pub fn reset(&self) {
        self.clear_from(0);

        if let Some(voice) = &self.voice {
            for pitch in 0..MIDI_NOTE_COUNT {
                voice.handle(&Event::note_off(0, pitch, TriggerFrame::Immediate), 0);
            }
            voice.reset();
        }
    }

    /// Routes one event: volume changes stay on the track, everything else
    /// goes to the voice if there is one.
    pub(crate) fn dispatch(&self, event: &Event, offset_frame: u32) {
        match event.kind {
            EventKind::Nop => {}
            EventKind::Volume => {
                if let Some(level) = event.volume_level() {
                    self.set_volume(level);
                }
            }
            _ => {
                if let Some(voice) = &self.voice {
                    voice.handle(event, offset_frame);
                }
            }
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("index", &self.index)
            .field("queue", &self.queue)
            .field("volume", &self.volume())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Immutable snapshot of the live tracks, indexed by track index.
///
/// Never mutated in place: every change builds a new table which the
/// scheduler publishes atomically, so the render thread always sees a whole
/// table.
#[derive(Debug, Clone, Default)]
pub struct TrackTable {
    slots: Vec<Option<Arc<Track>>>,
}

impl TrackTable {
    pub fn get(&self, index: TrackIndex) -> Option<&Arc<Track>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Track>> {
        self.slots.iter().flatten()
    }

    pub fn indices(&self) -> Vec<TrackIndex> {
        self.iter().map(|track| track.index()).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest index not held by a live track, if below `max_tracks`.
    pub fn next_free_index(&self, max_tracks: usize) -> Option<TrackIndex> {
        (0..max_tracks).find(|&index| self.get(index).is_none())
    }

    pub fn with_track(&self, track: Arc<Track>) -> Self {
        let mut slots = self.slots.clone();
        let index = track.index();
        if slots.len() <= index {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(track);
        Self { slots }
    }

    pub fn without(&self, index: TrackIndex) -> Option<(Self, Arc<Track>)> {
        let track = self.get(index)?.clone();
        let mut slots = self.slots.clone();
        slots[index] = None;
        while matches!(slots.last(), Some(None)) {
            slots.pop();
        }
        Some((Self { slots }, track))
    }
}
