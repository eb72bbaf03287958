#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use trackseq::{Event, OutputTarget, Voice};

/// Remembers every event it is handed, with its frame offset.
#[derive(Default)]
pub struct RecordingVoice {
    handled: Mutex<Vec<(Event, u32)>>,
    rendered_frames: AtomicUsize,
    level: f32,
}

impl RecordingVoice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A voice that also writes `level` into every sample it renders.
    pub fn with_level(level: f32) -> Arc<Self> {
        Arc::new(Self {
            level,
            ..Self::default()
        })
    }

    pub fn take(&self) -> Vec<(Event, u32)> {
        std::mem::take(&mut *self.handled.lock())
    }

    pub fn pitches(&self) -> Vec<u8> {
        self.handled.lock().iter().map(|(event, _)| event.data1).collect()
    }

    pub fn handled_count(&self) -> usize {
        self.handled.lock().len()
    }

    pub fn rendered_frames(&self) -> usize {
        self.rendered_frames.load(Ordering::Relaxed)
    }
}

impl Voice for RecordingVoice {
    fn handle(&self, event: &Event, offset_frame: u32) {
        self.handled.lock().push((*event, offset_frame));
    }

    fn render(&self, output: &mut [f32], channels: usize) {
        self.rendered_frames
            .fetch_add(output.len() / channels, Ordering::Relaxed);
        if self.level != 0.0 {
            output.fill(self.level);
        }
    }
}

/// Collects every buffer the renderer pushes.
pub struct CaptureOutput {
    channels: usize,
    samples: Arc<Mutex<Vec<f32>>>,
}

impl CaptureOutput {
    pub fn new(channels: usize) -> (Self, Arc<Mutex<Vec<f32>>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                channels,
                samples: samples.clone(),
            },
            samples,
        )
    }
}

impl OutputTarget for CaptureOutput {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn write(&mut self, interleaved: &[f32]) {
        self.samples.lock().extend_from_slice(interleaved);
    }
}
