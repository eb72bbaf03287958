use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
#[cfg(not(feature = "cpal"))]
use std::sync::atomic::AtomicU64;

use tracing::info;
use tracing_subscriber::EnvFilter;
use trackseq::audio::midi_to_freq;
#[cfg(not(feature = "cpal"))]
use trackseq::OutputTarget;
use trackseq::{Event, EventKind, Scheduler, SchedulerConfig, Voice};

const SAMPLE_RATE: u32 = 48_000;
const PHRASE: [u8; 8] = [60, 62, 64, 65, 67, 69, 71, 72];
const NOTE_FRAMES: u64 = SAMPLE_RATE as u64 / 4;

/// Monophonic sine with a linear fade on note on/off.
struct SineVoice {
    sample_rate: f32,
    freq: AtomicU32,
    phase: AtomicU32,
    level: AtomicU32,
    target: AtomicU32,
}

impl SineVoice {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            freq: AtomicU32::new(440.0_f32.to_bits()),
            phase: AtomicU32::new(0.0_f32.to_bits()),
            level: AtomicU32::new(0.0_f32.to_bits()),
            target: AtomicU32::new(0.0_f32.to_bits()),
        }
    }
}

impl Voice for SineVoice {
    fn handle(&self, event: &Event, _offset_frame: u32) {
        match event.kind {
            EventKind::NoteOn if event.data2 > 0 => {
                self.freq
                    .store(midi_to_freq(event.data1).to_bits(), Ordering::Relaxed);
                let gain = event.data2 as f32 / 127.0 * 0.3;
                self.target.store(gain.to_bits(), Ordering::Relaxed);
            }
            EventKind::NoteOn | EventKind::NoteOff => {
                self.target.store(0.0_f32.to_bits(), Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn render(&self, output: &mut [f32], channels: usize) {
        let freq = f32::from_bits(self.freq.load(Ordering::Relaxed));
        let target = f32::from_bits(self.target.load(Ordering::Relaxed));
        let mut phase = f32::from_bits(self.phase.load(Ordering::Relaxed));
        let mut level = f32::from_bits(self.level.load(Ordering::Relaxed));
        let step = 1.0 / (0.005 * self.sample_rate);

        for frame in output.chunks_mut(channels) {
            level = if level < target {
                (level + step).min(target)
            } else {
                (level - step).max(target)
            };
            let value = (phase * std::f32::consts::TAU).sin() * level;
            for sample in frame {
                *sample += value;
            }
            phase = (phase + freq / self.sample_rate).fract();
        }

        self.phase.store(phase.to_bits(), Ordering::Relaxed);
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    fn reset(&self) {
        self.level.store(0.0_f32.to_bits(), Ordering::Relaxed);
        self.target.store(0.0_f32.to_bits(), Ordering::Relaxed);
    }
}

/// Offline sink: counts frames and tracks the peak level.
#[cfg(not(feature = "cpal"))]
struct PeakMeter {
    channels: usize,
    frames: Arc<AtomicU64>,
    peak: Arc<AtomicU32>,
}

#[cfg(not(feature = "cpal"))]
impl OutputTarget for PeakMeter {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn write(&mut self, interleaved: &[f32]) {
        let peak = interleaved
            .iter()
            .fold(f32::from_bits(self.peak.load(Ordering::Relaxed)), |peak, sample| {
                peak.max(sample.abs())
            });
        self.peak.store(peak.to_bits(), Ordering::Relaxed);
        self.frames
            .fetch_add((interleaved.len() / self.channels) as u64, Ordering::Relaxed);
    }
}

fn phrase() -> Vec<Event> {
    PHRASE
        .iter()
        .zip(0u64..)
        .flat_map(|(&pitch, step)| {
            let start = step * NOTE_FRAMES;
            [
                Event::note_on(0, pitch, 100, start),
                Event::note_off(0, pitch, start + NOTE_FRAMES * 3 / 4),
            ]
        })
        .collect()
}

fn load_config() -> Result<SchedulerConfig, Box<dyn std::error::Error>> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            Ok(SchedulerConfig::load(&path)?)
        }
        None => Ok(SchedulerConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    run(config)
}

#[cfg(feature = "cpal")]
fn run(config: SchedulerConfig) -> Result<(), Box<dyn std::error::Error>> {
    use trackseq::NullOutput;
    use trackseq::audio::CpalOutput;

    let channels = config.channels;
    let (scheduler, renderer) =
        Scheduler::new(config, SAMPLE_RATE, Box::new(NullOutput::new(channels)))?;
    schedule_phrase(&scheduler)?;

    let output = CpalOutput::start(renderer)?;
    scheduler.play()?;
    info!(channels = output.channel_count(), "playing through default device");

    let seconds = phrase_frames() as f64 / SAMPLE_RATE as f64 + 0.5;
    std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
    scheduler.shutdown();
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn run(config: SchedulerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let frames = Arc::new(AtomicU64::new(0));
    let peak = Arc::new(AtomicU32::new(0.0_f32.to_bits()));
    let meter = PeakMeter {
        channels: config.channels,
        frames: frames.clone(),
        peak: peak.clone(),
    };

    let (scheduler, mut renderer) = Scheduler::new(config, SAMPLE_RATE, Box::new(meter))?;
    schedule_phrase(&scheduler)?;
    scheduler.play()?;

    while scheduler.position() < phrase_frames() {
        renderer.render_buffer(512);
    }

    info!(
        frames = frames.load(Ordering::Relaxed),
        peak = f32::from_bits(peak.load(Ordering::Relaxed)),
        render_us = scheduler.last_render_time_us(),
        "offline render finished"
    );
    scheduler.shutdown();
    Ok(())
}

fn phrase_frames() -> u64 {
    PHRASE.len() as u64 * NOTE_FRAMES
}

fn schedule_phrase(scheduler: &Scheduler) -> Result<(), Box<dyn std::error::Error>> {
    let track = scheduler.add_track()?;
    scheduler.set_track_voice(track, Arc::new(SineVoice::new(SAMPLE_RATE)))?;
    scheduler.set_track_volume(track, 0.8)?;
    scheduler.add_all_events(track, &phrase())?;
    Ok(())
}
