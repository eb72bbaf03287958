mod output;
mod track;
mod voice;

#[cfg(feature = "cpal")]
pub use output::{CpalOutput, OutputError};
pub use output::{NullOutput, OutputTarget};
pub use track::{Track, TrackControls, TrackIndex, TrackTable};
pub use voice::Voice;

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}
