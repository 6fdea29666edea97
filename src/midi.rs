//! MIDI message types and wire encoding
//!
//! A [`MidiMessage`] is the logical form a mapping carries: a kind plus every
//! field any kind may need. Fields are plain integers so that values read from
//! mapping files or computed by callers can be out of range; they are
//! saturated into the valid MIDI range right before encoding, never rejected.

pub mod output;

use std::fmt;

pub use output::{MidiError, MidiPort, MidiSink};

/// Highest valid MIDI channel (0-based)
pub const MAX_CHANNEL: i32 = 15;

/// Highest valid 7-bit data value
pub const MAX_DATA: i32 = 127;

/// Channel-voice message kinds produced by mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MidiKind {
    #[default]
    NoteOn,
    NoteOff,
    ControlChange,
}

impl MidiKind {
    /// Status nibble for this kind (channel bits cleared)
    pub fn status(self) -> u8 {
        match self {
            MidiKind::NoteOn => 0x90,
            MidiKind::NoteOff => 0x80,
            MidiKind::ControlChange => 0xB0,
        }
    }
}

/// Logical MIDI message prior to wire encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    pub kind: MidiKind,
    /// Channel (0-15)
    pub channel: i32,
    /// Note number, used by NoteOn/NoteOff
    pub note: i32,
    /// Velocity, used by NoteOn/NoteOff
    pub velocity: i32,
    /// Controller number, used by ControlChange
    pub controller: i32,
    /// Controller value, used by ControlChange
    pub value: i32,
}

impl Default for MidiMessage {
    fn default() -> Self {
        Self {
            kind: MidiKind::NoteOn,
            channel: 0,
            note: 60,
            velocity: 127,
            controller: 1,
            value: 64,
        }
    }
}

impl MidiMessage {
    pub fn note_on(channel: i32, note: i32, velocity: i32) -> Self {
        Self {
            kind: MidiKind::NoteOn,
            channel,
            note,
            velocity,
            ..Self::default()
        }
    }

    pub fn note_off(channel: i32, note: i32, velocity: i32) -> Self {
        Self {
            kind: MidiKind::NoteOff,
            channel,
            note,
            velocity,
            ..Self::default()
        }
    }

    pub fn control_change(channel: i32, controller: i32, value: i32) -> Self {
        Self {
            kind: MidiKind::ControlChange,
            channel,
            controller,
            value,
            ..Self::default()
        }
    }

    /// Copy of this message with every field saturated into its MIDI range
    pub fn clamped(&self) -> Self {
        Self {
            kind: self.kind,
            channel: self.channel.clamp(0, MAX_CHANNEL),
            note: self.note.clamp(0, MAX_DATA),
            velocity: self.velocity.clamp(0, MAX_DATA),
            controller: self.controller.clamp(0, MAX_DATA),
            value: self.value.clamp(0, MAX_DATA),
        }
    }

    /// Encode to the 3-byte channel-voice wire form
    ///
    /// Always clamps first, so encoding is total over any input.
    pub fn encode(&self) -> [u8; 3] {
        let m = self.clamped();
        let status = m.kind.status() | m.channel as u8;
        match m.kind {
            MidiKind::NoteOn | MidiKind::NoteOff => [status, m.note as u8, m.velocity as u8],
            MidiKind::ControlChange => [status, m.controller as u8, m.value as u8],
        }
    }

    /// Decode a 3-byte NoteOn/NoteOff/ControlChange message
    ///
    /// Fields not carried on the wire keep their defaults.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }

        let channel = (data[0] & 0x0F) as i32;
        let d1 = (data[1] & 0x7F) as i32;
        let d2 = (data[2] & 0x7F) as i32;

        match data[0] & 0xF0 {
            0x90 => Some(Self::note_on(channel, d1, d2)),
            0x80 => Some(Self::note_off(channel, d1, d2)),
            0xB0 => Some(Self::control_change(channel, d1, d2)),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.clamped();
        match m.kind {
            MidiKind::NoteOn => {
                write!(f, "Note On - Ch:{} Note:{} Vel:{}", m.channel + 1, m.note, m.velocity)
            }
            MidiKind::NoteOff => {
                write!(f, "Note Off - Ch:{} Note:{} Vel:{}", m.channel + 1, m.note, m.velocity)
            }
            MidiKind::ControlChange => {
                write!(f, "Control Change - Ch:{} CC:{} Val:{}", m.channel + 1, m.controller, m.value)
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
