//! Control-thread scheduler and render-thread renderer.
//!
//! [`Scheduler`] is the cloneable control handle: track management, event
//! scheduling, transport. [`Renderer`] is owned by whatever drives audio and
//! is the only thing that drains queues or advances the frame clock.
//!
//! The two meet through atomics and one copy-on-write track table. Control
//! mutations build a new table and publish it with `ArcSwap`. The replaced
//! table is dropped right away when no render call is in flight, otherwise it
//! is parked until the renderer has finished a callback after the swap. Either
//! way the last reference to a voice is dropped on a control thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Transport, TransportState};
use crate::audio::{OutputTarget, Track, TrackIndex, TrackTable, Voice};
use crate::config::{ConfigError, SchedulerConfig};
use crate::error::{Result, SchedulerError};
use crate::events::{Event, TriggerFrame};

struct Shared {
    config: SchedulerConfig,
    sample_rate: u32,
    tracks: ArcSwap<TrackTable>,
    control: Mutex<ControlState>,
    transport: Transport,
    position: AtomicU64,
    last_render_us: AtomicU64,
    renders_completed: AtomicU64,
    rendering: AtomicBool,
    shut_down: AtomicBool,
}

/// Control-side bookkeeping, guarded by `Shared::control`.
#[derive(Default)]
struct ControlState {
    /// Replaced tables, tagged with the render count seen right after the
    /// swap. Freed once the renderer has completed a later callback.
    retired: Vec<(u64, Arc<TrackTable>)>,
}

impl ControlState {
    fn reclaim(&mut self, renders_completed: u64) {
        self.retired
            .retain(|(swapped_at, _)| *swapped_at >= renders_completed);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Builds a scheduler and its renderer. The renderer mixes for `output`
    /// and takes its channel count from it, or from `config.channels` if
    /// `output` reports 0.
    pub fn new(
        config: SchedulerConfig,
        sample_rate: u32,
        output: Box<dyn OutputTarget>,
    ) -> Result<(Scheduler, Renderer), ConfigError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            config,
            sample_rate,
            tracks: ArcSwap::from_pointee(TrackTable::default()),
            control: Mutex::new(ControlState::default()),
            transport: Transport::new(),
            position: AtomicU64::new(0),
            last_render_us: AtomicU64::new(0),
            renders_completed: AtomicU64::new(0),
            rendering: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        });

        let renderer = Renderer::new(shared.clone(), output);
        info!(
            sample_rate,
            channels = renderer.channel_count(),
            queue_capacity = shared.config.queue_capacity,
            "scheduler created"
        );

        Ok((Scheduler { shared }, renderer))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            Err(SchedulerError::NotReady)
        } else {
            Ok(())
        }
    }

    fn track(&self, index: TrackIndex) -> Result<Arc<Track>> {
        self.ensure_running()?;
        self.reclaim_retired();
        self.shared
            .tracks
            .load()
            .get(index)
            .cloned()
            .ok_or(SchedulerError::NotFound(index))
    }

    /// Frees retired tables the renderer is done with. Skipped if another
    /// control thread holds the lock.
    fn reclaim_retired(&self) {
        if let Some(mut control) = self.shared.control.try_lock() {
            if !control.retired.is_empty() {
                control.reclaim(self.shared.renders_completed.load(Ordering::Acquire));
            }
        }
    }

    /// Builds and publishes a new track table from the current one.
    fn update_tracks<R>(
        &self,
        update: impl FnOnce(&TrackTable) -> Result<(TrackTable, R)>,
    ) -> Result<R> {
        let mut control = self.shared.control.lock();
        self.ensure_running()?;
        control.reclaim(self.shared.renders_completed.load(Ordering::Acquire));

        let current = self.shared.tracks.load_full();
        let (next, output) = update(&current)?;
        self.shared.tracks.store(Arc::new(next));

        // A render call loads the table only after raising `rendering`, so
        // with no call in flight nothing can still hold `current`.
        if self.shared.rendering.load(Ordering::SeqCst) {
            let swapped_at = self.shared.renders_completed.load(Ordering::SeqCst);
            control.retired.push((swapped_at, current));
        }
        Ok(output)
    }

    fn insert_track(&self, voice: Option<Arc<dyn Voice>>) -> Result<TrackIndex> {
        let config = &self.shared.config;
        let attached = voice.is_some();

        let index = self.update_tracks(|table| {
            let index = table
                .next_free_index(config.max_tracks)
                .ok_or(SchedulerError::TrackLimit(config.max_tracks))?;
            let track = Track::new(index, config.queue_capacity, config.default_volume, voice);
            Ok((table.with_track(Arc::new(track)), index))
        })?;

        info!(track = index, attached, "track added");
        Ok(index)
    }

    /// Reserves a track with no voice yet. It renders silence until
    /// [`set_track_voice`](Self::set_track_voice) attaches one.
    pub fn add_track(&self) -> Result<TrackIndex> {
        self.insert_track(None)
    }

    pub fn add_track_with_voice(&self, voice: Arc<dyn Voice>) -> Result<TrackIndex> {
        self.insert_track(Some(voice))
    }

    /// Attaches (or replaces) the voice of an existing track. Queued events
    /// and volume carry over.
    pub fn set_track_voice(&self, index: TrackIndex, voice: Arc<dyn Voice>) -> Result<()> {
        self.update_tracks(|table| {
            let track = table.get(index).ok_or(SchedulerError::NotFound(index))?;
            let replaced = track.with_voice(Some(voice));
            Ok((table.with_track(Arc::new(replaced)), ()))
        })?;

        info!(track = index, "voice attached");
        Ok(())
    }

    pub fn remove_track(&self, index: TrackIndex) -> Result<()> {
        self.update_tracks(|table| {
            let (next, _removed) = table.without(index).ok_or(SchedulerError::NotFound(index))?;
            Ok((next, ()))
        })?;

        info!(track = index, "track removed");
        Ok(())
    }

    /// Clears the track's queue, silences its voice and resets it.
    pub fn reset_track(&self, index: TrackIndex) -> Result<()> {
        self.track(index)?.reset();
        debug!(track = index, "track reset");
        Ok(())
    }

    /// Queues events for frame-accurate playback. Returns how many fit;
    /// the rest are rejected, not waited for.
    ///
    /// Events must be sorted by trigger frame and must not precede anything
    /// already queued on this track.
    pub fn add_events(&self, index: TrackIndex, events: &[Event]) -> Result<usize> {
        let track = self.track(index)?;
        if !events.is_sorted_by_key(|event| event.trigger.ordering_frame()) {
            debug!(track = index, "event batch is not sorted by trigger frame");
        }

        let accepted = track.add_events(events);
        if accepted < events.len() {
            warn!(
                track = index,
                requested = events.len(),
                accepted,
                "event queue full, batch truncated"
            );
        } else {
            debug!(track = index, accepted, "events scheduled");
        }
        Ok(accepted)
    }

    /// Like [`add_events`](Self::add_events) but queues nothing unless the
    /// whole batch fits.
    pub fn add_all_events(&self, index: TrackIndex, events: &[Event]) -> Result<()> {
        self.track(index)?
            .add_all_events(events)
            .map_err(|available| SchedulerError::CapacityExceeded {
                requested: events.len(),
                available,
            })
    }

    /// Sends events straight to the track's voice on the calling thread.
    /// Trigger frames are ignored. Must not be called from the render thread.
    pub fn handle_events_now(&self, index: TrackIndex, events: &[Event]) -> Result<usize> {
        Ok(self.track(index)?.handle_now(events))
    }

    /// Drops queued events triggering at or after `from_frame`. Returns how
    /// many were dropped.
    pub fn clear_events(&self, index: TrackIndex, from_frame: u64) -> Result<usize> {
        let removed = self.track(index)?.clear_from(from_frame);
        debug!(track = index, from_frame, removed, "events cleared");
        Ok(removed)
    }

    pub fn play(&self) -> Result<()> {
        self.ensure_running()?;
        if self.shared.transport.play() {
            info!(position = self.position(), "playing");
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.ensure_running()?;
        if self.shared.transport.pause() {
            info!(position = self.position(), "paused");
        }
        Ok(())
    }

    pub fn transport_state(&self) -> TransportState {
        self.shared.transport.state()
    }

    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    pub fn track_volume(&self, index: TrackIndex) -> Result<f32> {
        Ok(self.track(index)?.volume())
    }

    pub fn set_track_volume(&self, index: TrackIndex, volume: f32) -> Result<()> {
        self.track(index)?.set_volume(volume);
        Ok(())
    }

    pub fn buffer_available_count(&self, index: TrackIndex) -> Result<usize> {
        Ok(self.track(index)?.queue().available_count())
    }

    pub fn dropped_late_events(&self, index: TrackIndex) -> Result<u64> {
        Ok(self.track(index)?.controls().dropped_late())
    }

    pub fn track_indices(&self) -> Vec<TrackIndex> {
        self.shared.tracks.load().indices()
    }

    pub fn last_render_time_us(&self) -> u64 {
        self.shared.last_render_us.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Stops the transport, waits for any in-flight render call to finish
    /// and releases every track and voice. Afterwards the renderer outputs
    /// silence and control calls fail with [`SchedulerError::NotReady`].
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.transport.stop();

        while self.shared.rendering.load(Ordering::SeqCst) {
            std::hint::spin_loop();
            std::thread::yield_now();
        }

        let mut control = self.shared.control.lock();
        let released = self.shared.tracks.swap(Arc::new(TrackTable::default()));
        control.retired.clear();
        info!(tracks = released.len(), "scheduler shut down");
    }
}

/// Render-thread half of the scheduler. Exactly one exists per scheduler.
pub struct Renderer {
    shared: Arc<Shared>,
    output: Box<dyn OutputTarget>,
    channels: usize,
    mix: Vec<f32>,
    scratch: Vec<f32>,
}

impl Renderer {
    fn new(shared: Arc<Shared>, output: Box<dyn OutputTarget>) -> Self {
        let channels = match output.channel_count() {
            0 => shared.config.channels,
            channels => channels,
        };
        let block = shared.config.max_block_frames * channels;
        Self {
            shared,
            output,
            channels,
            mix: vec![0.0; block],
            scratch: vec![0.0; block],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Changes the interleaved channel count used by
    /// [`render_into`](Self::render_into). Reallocates; call it before the
    /// renderer is handed to the audio callback.
    pub fn set_channel_count(&mut self, channels: usize) {
        self.channels = channels.max(1);
        let block = self.shared.config.max_block_frames * self.channels;
        self.mix = vec![0.0; block];
        self.scratch = vec![0.0; block];
    }

    /// Pull mode: renders `output.len() / channels` frames into `output`,
    /// overwriting it.
    pub fn render_into(&mut self, output: &mut [f32]) {
        let started = Instant::now();
        output.fill(0.0);

        if !self.enter() {
            return;
        }

        {
            let tracks = self.shared.tracks.load();
            let block = self.shared.config.max_block_frames * self.channels;
            for chunk in output.chunks_mut(block) {
                render_block(&self.shared, &tracks, &mut self.scratch, self.channels, chunk);
            }
        }

        self.leave(started);
    }

    /// Push mode: renders `frame_count` frames and hands them to the output
    /// target, one block at a time.
    pub fn render_buffer(&mut self, frame_count: usize) {
        let started = Instant::now();
        if !self.enter() {
            self.write_silence(frame_count);
            return;
        }

        {
            let tracks = self.shared.tracks.load();
            let mut remaining = frame_count;
            while remaining > 0 {
                let frames = remaining.min(self.shared.config.max_block_frames);
                let mix = &mut self.mix[..frames * self.channels];
                mix.fill(0.0);
                render_block(&self.shared, &tracks, &mut self.scratch, self.channels, mix);
                self.output.write(mix);
                remaining -= frames;
            }
        }

        self.leave(started);
    }

    /// Never touches the track table.
    fn write_silence(&mut self, frame_count: usize) {
        let mut remaining = frame_count;
        while remaining > 0 {
            let frames = remaining.min(self.shared.config.max_block_frames);
            let mix = &mut self.mix[..frames * self.channels];
            mix.fill(0.0);
            self.output.write(mix);
            remaining -= frames;
        }
    }

    fn enter(&self) -> bool {
        self.shared.rendering.store(true, Ordering::SeqCst);
        if self.shared.shut_down.load(Ordering::SeqCst) {
            self.shared.rendering.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn leave(&self, started: Instant) {
        let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.shared.last_render_us.store(elapsed, Ordering::Relaxed);
        self.shared.renders_completed.fetch_add(1, Ordering::SeqCst);
        self.shared.rendering.store(false, Ordering::SeqCst);
    }
}

/// Renders one block (at most `max_block_frames`) of every track into `out`.
///
/// While playing, each track's due events are dispatched at their exact
/// frame offset: the voice renders up to the event, handles it, and carries
/// on. Afterwards the clock advances by the block length. While paused or
/// stopped the voices still render, but nothing is drained and the clock
/// holds.
fn render_block(
    shared: &Shared,
    tracks: &TrackTable,
    scratch: &mut [f32],
    channels: usize,
    out: &mut [f32],
) {
    let frames = out.len() / channels;
    if frames == 0 {
        return;
    }
    let out = &mut out[..frames * channels];

    let playing = shared.transport.is_playing();
    let start = shared.position.load(Ordering::Acquire);
    let end = start + frames as u64;
    let tolerance = shared.config.late_event_tolerance;

    for track in tracks.iter() {
        let mut rendered = 0usize;

        if playing {
            for event in track.queue().drain_due(end - 1) {
                let offset = match event.trigger {
                    TriggerFrame::Immediate => 0,
                    TriggerFrame::At(frame) if frame < start => {
                        if start - frame > tolerance {
                            track.controls().record_dropped_late();
                            continue;
                        }
                        0
                    }
                    TriggerFrame::At(frame) => (frame - start) as usize,
                };
                let offset = offset.max(rendered);

                if offset > rendered {
                    render_segment(track, scratch, channels, &mut out[rendered * channels..offset * channels]);
                    rendered = offset;
                }
                track.dispatch(&event, offset as u32);
            }
        }

        render_segment(track, scratch, channels, &mut out[rendered * channels..]);
    }

    if playing {
        shared.position.fetch_add(frames as u64, Ordering::AcqRel);
    }
}

/// Renders the track's voice for `out.len() / channels` frames and mixes it
/// into `out` at the track's current volume. Unattached tracks add nothing.
fn render_segment(track: &Track, scratch: &mut [f32], channels: usize, out: &mut [f32]) {
    let Some(voice) = track.voice() else {
        return;
    };
    if out.is_empty() {
        return;
    }

    let segment = &mut scratch[..out.len()];
    segment.fill(0.0);
    voice.render(segment, channels);

    let gain = track.volume();
    for (sample, rendered) in out.iter_mut().zip(segment.iter()) {
        *sample += rendered * gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullOutput;
    use approx::assert_relative_eq;

    /// Writes a constant level and remembers every (event, offset) it sees.
    struct DcVoice {
        level: f32,
        handled: Mutex<Vec<(Event, u32)>>,
    }

    impl DcVoice {
        fn new(level: f32) -> Arc<Self> {
            Arc::new(Self {
                level,
                handled: Mutex::new(Vec::new()),
            })
        }

        fn offsets(&self) -> Vec<u32> {
            self.handled.lock().iter().map(|(_, offset)| *offset).collect()
        }
    }

    impl Voice for DcVoice {
        fn handle(&self, event: &Event, offset_frame: u32) {
            self.handled.lock().push((*event, offset_frame));
        }

        fn render(&self, output: &mut [f32], _channels: usize) {
            output.fill(self.level);
        }
    }

    /// Counts frames written, checking every sample is silent.
    struct CountingOutput {
        channels: usize,
        frames: Arc<AtomicU64>,
    }

    impl CountingOutput {
        fn new(channels: usize) -> (Self, Arc<AtomicU64>) {
            let frames = Arc::new(AtomicU64::new(0));
            (
                Self {
                    channels,
                    frames: frames.clone(),
                },
                frames,
            )
        }
    }

    impl OutputTarget for CountingOutput {
        fn channel_count(&self) -> usize {
            self.channels
        }

        fn write(&mut self, interleaved: &[f32]) {
            assert!(interleaved.iter().all(|sample| *sample == 0.0));
            self.frames
                .fetch_add((interleaved.len() / self.channels) as u64, Ordering::Relaxed);
        }
    }

    fn scheduler_with(config: SchedulerConfig, channels: usize) -> (Scheduler, Renderer) {
        Scheduler::new(config, 48_000, Box::new(NullOutput::new(channels))).unwrap()
    }

    fn scheduler() -> (Scheduler, Renderer) {
        scheduler_with(SchedulerConfig::default(), 1)
    }

    #[test]
    fn test_events_dispatched_at_frame_offsets() {
        let (scheduler, mut renderer) = scheduler();
        let voice = DcVoice::new(0.0);
        let track = scheduler.add_track_with_voice(voice.clone()).unwrap();
        scheduler
            .add_events(
                track,
                &[Event::note_on(0, 60, 100, 5), Event::note_off(0, 60, 70)],
            )
            .unwrap();
        scheduler.play().unwrap();

        renderer.render_buffer(64);
        renderer.render_buffer(64);

        assert_eq!(voice.offsets(), vec![5, 6]);
        assert_eq!(scheduler.position(), 128);
    }

    #[test]
    fn test_late_events_within_tolerance_play_at_start() {
        let mut config = SchedulerConfig::default();
        config.late_event_tolerance = 100;
        let (scheduler, mut renderer) = scheduler_with(config, 1);
        let voice = DcVoice::new(0.0);
        let track = scheduler.add_track_with_voice(voice.clone()).unwrap();
        scheduler.play().unwrap();

        renderer.render_buffer(500);
        scheduler
            .add_events(
                track,
                &[Event::note_on(0, 1, 1, 350), Event::note_on(0, 2, 1, 450)],
            )
            .unwrap();
        renderer.render_buffer(10);

        let handled = voice.handled.lock();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0.data1, 2);
        assert_eq!(handled[0].1, 0);
        drop(handled);
        assert_eq!(scheduler.dropped_late_events(track).unwrap(), 1);
    }

    #[test]
    fn test_volume_event_changes_gain_mid_block() {
        let (scheduler, mut renderer) = scheduler();
        let track = scheduler.add_track_with_voice(DcVoice::new(1.0)).unwrap();
        scheduler
            .add_events(track, &[Event::volume(0.0, 4)])
            .unwrap();
        scheduler.play().unwrap();

        let mut out = vec![0.0f32; 8];
        renderer.render_into(&mut out);

        for sample in &out[..4] {
            assert_relative_eq!(*sample, 1.0);
        }
        for sample in &out[4..] {
            assert_relative_eq!(*sample, 0.0);
        }
        assert_relative_eq!(scheduler.track_volume(track).unwrap(), 0.0);
    }

    #[test]
    fn test_tracks_are_summed_with_volume() {
        let (scheduler, mut renderer) = scheduler_with(SchedulerConfig::default(), 2);
        let a = scheduler.add_track_with_voice(DcVoice::new(0.5)).unwrap();
        let b = scheduler.add_track_with_voice(DcVoice::new(0.25)).unwrap();
        scheduler.set_track_volume(a, 0.5).unwrap();
        scheduler.set_track_volume(b, 2.0).unwrap();

        let mut out = vec![1.0f32; 16];
        renderer.render_into(&mut out);

        for sample in out {
            assert_relative_eq!(sample, 0.75);
        }
    }

    #[test]
    fn test_paused_voices_still_render_but_clock_holds() {
        let (scheduler, mut renderer) = scheduler();
        let voice = DcVoice::new(0.5);
        let track = scheduler.add_track_with_voice(voice.clone()).unwrap();
        scheduler.add_events(track, &[Event::note_on(0, 60, 100, 0)]).unwrap();

        let mut out = vec![0.0f32; 32];
        renderer.render_into(&mut out);

        assert_eq!(scheduler.position(), 0);
        assert!(voice.handled.lock().is_empty());
        assert_relative_eq!(out[31], 0.5);
    }

    #[test]
    fn test_reserved_track_renders_silence_and_consumes_events() {
        let (scheduler, mut renderer) = scheduler();
        let track = scheduler.add_track().unwrap();
        scheduler
            .add_events(track, &[Event::note_on(0, 60, 100, 10), Event::volume(0.5, 20)])
            .unwrap();
        scheduler.play().unwrap();

        let mut out = vec![0.0f32; 64];
        renderer.render_into(&mut out);

        assert!(out.iter().all(|sample| *sample == 0.0));
        assert_eq!(scheduler.buffer_available_count(track).unwrap(), 1024);
        assert_relative_eq!(scheduler.track_volume(track).unwrap(), 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_large_buffers_are_split_into_blocks() {
        let mut config = SchedulerConfig::default();
        config.max_block_frames = 16;
        let (scheduler, mut renderer) = scheduler_with(config, 1);
        let voice = DcVoice::new(0.0);
        let track = scheduler.add_track_with_voice(voice.clone()).unwrap();
        scheduler
            .add_events(
                track,
                &[Event::note_on(0, 60, 1, 3), Event::note_on(0, 61, 1, 40)],
            )
            .unwrap();
        scheduler.play().unwrap();

        let mut out = vec![0.0f32; 50];
        renderer.render_into(&mut out);

        assert_eq!(scheduler.position(), 50);
        // second event lands in the third block, 40 - 32 frames in
        assert_eq!(voice.offsets(), vec![3, 8]);
    }

    #[test]
    fn test_removed_voice_released_while_renderer_idle() {
        let (scheduler, mut renderer) = scheduler();
        let voice = DcVoice::new(0.0);
        let track = scheduler.add_track_with_voice(voice.clone()).unwrap();
        renderer.render_buffer(64);

        scheduler.remove_track(track).unwrap();
        assert_eq!(Arc::strong_count(&voice), 1);

        for _ in 0..1000 {
            let churned = DcVoice::new(0.0);
            let index = scheduler.add_track_with_voice(churned.clone()).unwrap();
            scheduler.remove_track(index).unwrap();
            assert_eq!(Arc::strong_count(&churned), 1);
        }
        assert!(scheduler.shared.control.lock().retired.is_empty());
    }

    #[test]
    fn test_table_swapped_mid_render_is_parked_until_render_completes() {
        let (scheduler, renderer) = scheduler();
        let keep = scheduler.add_track().unwrap();
        let voice = DcVoice::new(0.0);
        let track = scheduler.add_track_with_voice(voice.clone()).unwrap();

        // the renderer is between enter() and leave()
        assert!(renderer.enter());
        scheduler.remove_track(track).unwrap();
        assert_eq!(Arc::strong_count(&voice), 2);
        scheduler.set_track_volume(keep, 0.5).unwrap();
        assert_eq!(Arc::strong_count(&voice), 2);

        renderer.leave(Instant::now());
        // any later control call frees it, no table change needed
        scheduler.track_volume(keep).unwrap();
        assert_eq!(Arc::strong_count(&voice), 1);
        assert!(scheduler.shared.control.lock().retired.is_empty());
    }

    #[test]
    fn test_render_buffer_after_shutdown_leaves_table_alone() {
        let (output, written) = CountingOutput::new(2);
        let (scheduler, mut renderer) =
            Scheduler::new(SchedulerConfig::default(), 48_000, Box::new(output)).unwrap();
        scheduler.add_track_with_voice(DcVoice::new(1.0)).unwrap();
        scheduler.shutdown();

        renderer.render_buffer(100);

        assert_eq!(written.load(Ordering::Relaxed), 100);
        assert!(!scheduler.shared.rendering.load(Ordering::SeqCst));
        assert_eq!(scheduler.shared.renders_completed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_channel_count_falls_back_to_config() {
        let config = SchedulerConfig {
            channels: 3,
            ..SchedulerConfig::default()
        };
        let (_scheduler, renderer) =
            Scheduler::new(config.clone(), 48_000, Box::new(NullOutput::new(0))).unwrap();
        assert_eq!(renderer.channel_count(), 3);

        let (_scheduler, renderer) =
            Scheduler::new(config, 48_000, Box::new(NullOutput::new(1))).unwrap();
        assert_eq!(renderer.channel_count(), 1);
    }

    #[test]
    fn test_shutdown_silences_and_rejects() {
        let (scheduler, mut renderer) = scheduler();
        let voice = DcVoice::new(1.0);
        let track = scheduler.add_track_with_voice(voice.clone()).unwrap();
        scheduler.play().unwrap();

        scheduler.shutdown();
        assert_eq!(Arc::strong_count(&voice), 1);
        assert_eq!(scheduler.transport_state(), TransportState::Stopped);
        assert_eq!(scheduler.add_track(), Err(SchedulerError::NotReady));
        assert_eq!(scheduler.track_volume(track), Err(SchedulerError::NotReady));
        assert_eq!(scheduler.play(), Err(SchedulerError::NotReady));

        let mut out = vec![1.0f32; 8];
        renderer.render_into(&mut out);
        assert!(out.iter().all(|sample| *sample == 0.0));
        assert_eq!(scheduler.position(), 0);

        // second shutdown is a no-op
        scheduler.shutdown();
    }

    #[test]
    fn test_track_limit() {
        let mut config = SchedulerConfig::default();
        config.max_tracks = 2;
        let (scheduler, _renderer) = scheduler_with(config, 1);

        assert_eq!(scheduler.add_track(), Ok(0));
        assert_eq!(scheduler.add_track(), Ok(1));
        assert_eq!(scheduler.add_track(), Err(SchedulerError::TrackLimit(2)));

        scheduler.remove_track(0).unwrap();
        assert_eq!(scheduler.add_track(), Ok(0));
    }

    #[test]
    fn test_render_time_is_recorded() {
        let (scheduler, mut renderer) = scheduler();
        scheduler.add_track_with_voice(DcVoice::new(0.1)).unwrap();
        renderer.render_buffer(256);
        // the value is timing dependent; it just has to be a sane duration
        assert!(scheduler.last_render_time_us() < 1_000_000);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.queue_capacity = 3;
        assert!(Scheduler::new(config, 44_100, Box::new(NullOutput::new(2))).is_err());
    }
}
