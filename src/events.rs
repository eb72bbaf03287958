/// Where on the global frame clock an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerFrame {
    /// Due as soon as it is seen, at offset 0 of the current buffer.
    Immediate,
    /// Absolute frame on the scheduler's frame clock.
    At(u64),
}

impl TriggerFrame {
    /// Wire value for [`TriggerFrame::Immediate`].
    pub const IMMEDIATE_SENTINEL: u64 = u64::MAX;

    pub fn from_raw(raw: u64) -> Self {
        if raw == Self::IMMEDIATE_SENTINEL {
            TriggerFrame::Immediate
        } else {
            TriggerFrame::At(raw)
        }
    }

    pub fn to_raw(self) -> u64 {
        match self {
            TriggerFrame::Immediate => Self::IMMEDIATE_SENTINEL,
            TriggerFrame::At(frame) => frame,
        }
    }

    /// Frame used for ordering and truncation. Immediate events sort first.
    pub fn ordering_frame(self) -> u64 {
        match self {
            TriggerFrame::Immediate => 0,
            TriggerFrame::At(frame) => frame,
        }
    }

    pub fn is_due(self, up_to_frame: u64) -> bool {
        match self {
            TriggerFrame::Immediate => true,
            TriggerFrame::At(frame) => frame <= up_to_frame,
        }
    }
}

impl From<u64> for TriggerFrame {
    fn from(frame: u64) -> Self {
        TriggerFrame::from_raw(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    NoteOn = 0,
    NoteOff = 1,
    ControlChange = 2,
    ProgramChange = 3,
    PitchBend = 4,
    /// Sets the owning track's volume; handled by the scheduler, not the voice.
    Volume = 5,
    /// Placeholder left behind by an undecodable record. Never dispatched.
    Nop = 0xFF,
}

impl EventKind {
    /// Maps a wire tag to a kind. `Nop` has no wire form.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EventKind::NoteOn),
            1 => Some(EventKind::NoteOff),
            2 => Some(EventKind::ControlChange),
            3 => Some(EventKind::ProgramChange),
            4 => Some(EventKind::PitchBend),
            5 => Some(EventKind::Volume),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Largest value carried by a pair of 7-bit data bytes.
const FOURTEEN_BIT_MAX: u16 = 0x3FFF;

/// A frame-stamped channel event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub channel: u8,
    pub data1: u8,
    pub data2: u8,
    pub trigger: TriggerFrame,
}

impl Event {
    pub fn new(
        kind: EventKind,
        channel: u8,
        data1: u8,
        data2: u8,
        trigger: impl Into<TriggerFrame>,
    ) -> Self {
        Self {
            kind,
            channel,
            data1,
            data2,
            trigger: trigger.into(),
        }
    }

    pub fn note_on(channel: u8, pitch: u8, velocity: u8, trigger: impl Into<TriggerFrame>) -> Self {
        Self::new(EventKind::NoteOn, channel, pitch, velocity, trigger)
    }

    pub fn note_off(channel: u8, pitch: u8, trigger: impl Into<TriggerFrame>) -> Self {
        Self::new(EventKind::NoteOff, channel, pitch, 0, trigger)
    }

    pub fn control_change(
        channel: u8,
        controller: u8,
        value: u8,
        trigger: impl Into<TriggerFrame>,
    ) -> Self {
        Self::new(EventKind::ControlChange, channel, controller, value, trigger)
    }

    pub fn program_change(channel: u8, program: u8, trigger: impl Into<TriggerFrame>) -> Self {
        Self::new(EventKind::ProgramChange, channel, program, 0, trigger)
    }

    /// `value` is the 14-bit bend amount, 8192 being centre.
    pub fn pitch_bend(channel: u8, value: u16, trigger: impl Into<TriggerFrame>) -> Self {
        let (lsb, msb) = split_fourteen_bits(value);
        Self::new(EventKind::PitchBend, channel, lsb, msb, trigger)
    }

    /// Track volume change, `level` in `0.0..=1.0` at 14-bit resolution.
    pub fn volume(level: f32, trigger: impl Into<TriggerFrame>) -> Self {
        let scaled = (level.clamp(0.0, 1.0) * FOURTEEN_BIT_MAX as f32).round() as u16;
        let (lsb, msb) = split_fourteen_bits(scaled);
        Self::new(EventKind::Volume, 0, lsb, msb, trigger)
    }

    pub fn nop() -> Self {
        Self::new(EventKind::Nop, 0, 0, 0, TriggerFrame::Immediate)
    }

    pub fn is_nop(&self) -> bool {
        self.kind == EventKind::Nop
    }

    pub fn volume_level(&self) -> Option<f32> {
        match self.kind {
            EventKind::Volume => {
                let raw = join_fourteen_bits(self.data1, self.data2);
                Some(raw as f32 / FOURTEEN_BIT_MAX as f32)
            }
            _ => None,
        }
    }

    /// Channel-voice MIDI bytes for voices that speak raw MIDI.
    /// Volume and no-op events have no MIDI form.
    pub fn midi_bytes(&self) -> Option<[u8; 3]> {
        let status = match self.kind {
            EventKind::NoteOff => 0x80,
            EventKind::NoteOn => 0x90,
            EventKind::ControlChange => 0xB0,
            EventKind::ProgramChange => 0xC0,
            EventKind::PitchBend => 0xE0,
            EventKind::Volume | EventKind::Nop => return None,
        };
        Some([status | (self.channel & 0x0F), self.data1, self.data2])
    }

    /// Packs everything but the trigger into one word for lock-free storage.
    pub(crate) fn pack_payload(&self) -> u32 {
        u32::from_le_bytes([self.kind.tag(), self.channel, self.data1, self.data2])
    }

    pub(crate) fn from_packed(payload: u32, trigger: u64) -> Self {
        let [tag, channel, data1, data2] = payload.to_le_bytes();
        let kind = EventKind::from_tag(tag).unwrap_or(EventKind::Nop);
        Self::new(kind, channel, data1, data2, TriggerFrame::from_raw(trigger))
    }
}

fn split_fourteen_bits(value: u16) -> (u8, u8) {
    let value = value.min(FOURTEEN_BIT_MAX);
    ((value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8)
}

fn join_fourteen_bits(lsb: u8, msb: u8) -> u16 {
    ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_immediate_sentinel() {
        assert_eq!(TriggerFrame::from_raw(u64::MAX), TriggerFrame::Immediate);
        assert_eq!(TriggerFrame::from_raw(42), TriggerFrame::At(42));
        assert_eq!(TriggerFrame::Immediate.to_raw(), u64::MAX);
        assert_eq!(TriggerFrame::Immediate.ordering_frame(), 0);
        assert!(TriggerFrame::Immediate.is_due(0));
        assert!(!TriggerFrame::At(10).is_due(9));
    }

    #[test]
    fn test_midi_bytes() {
        let on = Event::note_on(3, 60, 100, 0);
        assert_eq!(on.midi_bytes(), Some([0x93, 60, 100]));

        let off = Event::note_off(0, 60, 0);
        assert_eq!(off.midi_bytes(), Some([0x80, 60, 0]));

        assert_eq!(Event::volume(0.5, 0).midi_bytes(), None);
        assert_eq!(Event::nop().midi_bytes(), None);
    }

    #[test]
    fn test_volume_resolution() {
        assert_relative_eq!(Event::volume(1.0, 0).volume_level().unwrap(), 1.0);
        assert_relative_eq!(Event::volume(0.0, 0).volume_level().unwrap(), 0.0);
        assert_relative_eq!(
            Event::volume(0.25, 0).volume_level().unwrap(),
            0.25,
            epsilon = 1.0 / 16383.0
        );
        // out of range levels are clamped
        assert_relative_eq!(Event::volume(3.0, 0).volume_level().unwrap(), 1.0);
    }

    #[test]
    fn test_pitch_bend_split() {
        let bend = Event::pitch_bend(0, 8192, 0);
        assert_eq!((bend.data1, bend.data2), (0x00, 0x40));
        let max = Event::pitch_bend(0, u16::MAX, 0);
        assert_eq!((max.data1, max.data2), (0x7F, 0x7F));
    }

    #[test]
    fn test_payload_packing() {
        let event = Event::control_change(9, 7, 127, 1234);
        let restored = Event::from_packed(event.pack_payload(), event.trigger.to_raw());
        assert_eq!(restored, event);
    }
}
