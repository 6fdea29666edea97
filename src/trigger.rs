//! Trigger evaluation shared by keyboard and HID inputs
//!
//! The engine is a pure decision table: it is handed a rule and a sample and
//! answers whether the rule fires. History (previous HID report, keys held
//! down) is owned by the callers.

use std::fmt;

use crate::midi::MidiMessage;

/// Condition a rule waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    ValueChange,
    ValueEquals,
    ValueGreater,
    ValueLess,
    ButtonPress,
    ButtonRelease,
    KeyDown,
    KeyUp,
}

impl TriggerKind {
    /// Kinds a HID mapping can use, in file-code order
    pub const HID_KINDS: [TriggerKind; 6] = [
        TriggerKind::ValueChange,
        TriggerKind::ValueEquals,
        TriggerKind::ValueGreater,
        TriggerKind::ValueLess,
        TriggerKind::ButtonPress,
        TriggerKind::ButtonRelease,
    ];

    /// Integer code used by the HID mapping file (`triggerType`)
    pub fn hid_code(self) -> Option<i32> {
        Self::HID_KINDS
            .iter()
            .position(|k| *k == self)
            .map(|i| i as i32)
    }

    /// Parse a HID mapping `triggerType` code
    pub fn from_hid_code(code: i64) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::HID_KINDS.get(i).copied())
    }
}

/// Input a rule listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// Virtual key code (1-255)
    Key(u8),
    /// Masked byte of a HID report
    Hid {
        device_path: String,
        byte_index: i32,
        bit_mask: u32,
    },
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Key(vk_code) => write!(f, "VK_{:03}", vk_code),
            TriggerSource::Hid { device_path, byte_index, .. } => {
                write!(f, "{} byte {}", device_path, byte_index)
            }
        }
    }
}

/// A fully resolved rule as the engine sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRule {
    pub source: TriggerSource,
    pub kind: TriggerKind,
    /// Comparison value for ValueEquals/ValueGreater/ValueLess
    pub threshold: i32,
    pub message: MidiMessage,
    pub enabled: bool,
    /// Swallow auto-repeats of this key system-wide
    pub suppress_auto_repeat: bool,
    /// Ignore auto-repeats of this key when deciding whether to fire
    pub filter_auto_repeat: bool,
}

/// What happened on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// Current and previous masked value of a HID byte
    Value { current: i32, previous: i32 },
    /// Keyboard transition
    Key { is_down: bool },
}

/// Decide whether a rule of `kind` with `threshold` fires for `sample`
///
/// Value kinds never fire on keyboard samples and key kinds never fire on
/// value samples.
pub fn evaluate_kind(kind: TriggerKind, threshold: i32, sample: Sample) -> bool {
    match (kind, sample) {
        (TriggerKind::ValueChange, Sample::Value { current, previous }) => current != previous,
        (TriggerKind::ValueEquals, Sample::Value { current, previous }) => {
            current == threshold && previous != threshold
        }
        (TriggerKind::ValueGreater, Sample::Value { current, previous }) => {
            current > threshold && previous <= threshold
        }
        (TriggerKind::ValueLess, Sample::Value { current, previous }) => {
            current < threshold && previous >= threshold
        }
        (TriggerKind::ButtonPress, Sample::Value { current, previous }) => {
            previous == 0 && current != 0
        }
        (TriggerKind::ButtonRelease, Sample::Value { current, previous }) => {
            previous != 0 && current == 0
        }
        (TriggerKind::KeyDown, Sample::Key { is_down }) => is_down,
        (TriggerKind::KeyUp, Sample::Key { is_down }) => !is_down,
        _ => false,
    }
}

/// Decide whether `rule` fires for `sample`; disabled rules never fire
pub fn evaluate(rule: &TriggerRule, sample: Sample) -> bool {
    rule.enabled && evaluate_kind(rule.kind, rule.threshold, sample)
}

/// Masked byte at `byte_index`, or 0 when the index falls outside `data`
pub fn extract_value(data: &[u8], byte_index: i32, bit_mask: u32) -> i32 {
    usize::try_from(byte_index)
        .ok()
        .and_then(|i| data.get(i))
        .map(|byte| (*byte as u32 & bit_mask) as i32)
        .unwrap_or(0)
}
