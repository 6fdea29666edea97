//! HID mapping entries and the `hidMappings` schema
//!
//! Trigger kinds and MIDI kinds are stored as integer codes:
//! `triggerType` 0=ValueChange 1=ValueEquals 2=ValueGreater 3=ValueLess
//! 4=ButtonPress 5=ButtonRelease, MIDI `type` 0=NoteOn 1=NoteOff 2=ControlChange.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_lenient, MappingError};
use crate::midi::{MidiKind, MidiMessage};
use crate::trigger::{TriggerKind, TriggerRule, TriggerSource};

/// One HID mapping: a masked report byte, a trigger condition and a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidMapping {
    pub device_path: String,
    pub device_name: String,
    pub byte_index: i32,
    pub bit_mask: u32,
    /// Always one of [`TriggerKind::HID_KINDS`]
    pub trigger: TriggerKind,
    pub trigger_value: i32,
    pub enabled: bool,
    pub message: MidiMessage,
}

impl HidMapping {
    pub fn new(device_path: impl Into<String>, byte_index: i32, trigger: TriggerKind) -> Self {
        Self {
            device_path: device_path.into(),
            device_name: String::new(),
            byte_index,
            bit_mask: 0xFF,
            trigger,
            trigger_value: 0,
            enabled: true,
            message: MidiMessage::default(),
        }
    }

    pub fn rule(&self) -> TriggerRule {
        TriggerRule {
            source: TriggerSource::Hid {
                device_path: self.device_path.clone(),
                byte_index: self.byte_index,
                bit_mask: self.bit_mask,
            },
            kind: self.trigger,
            threshold: self.trigger_value,
            message: self.message,
            enabled: self.enabled,
            suppress_auto_repeat: false,
            filter_auto_repeat: false,
        }
    }
}

/// Integer code of a MIDI kind in HID mapping files
pub fn kind_code(kind: MidiKind) -> i64 {
    match kind {
        MidiKind::NoteOn => 0,
        MidiKind::NoteOff => 1,
        MidiKind::ControlChange => 2,
    }
}

/// Parse a MIDI kind code; unknown codes read as NoteOn
pub fn parse_kind_code(code: i64) -> MidiKind {
    match code {
        1 => MidiKind::NoteOff,
        2 => MidiKind::ControlChange,
        _ => MidiKind::NoteOn,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    #[serde(rename = "type", default)]
    kind: i64,
    #[serde(default)]
    channel: i32,
    #[serde(default = "default_note")]
    note: i32,
    #[serde(default = "default_velocity")]
    velocity: i32,
    #[serde(default = "default_controller")]
    controller: i32,
    #[serde(default = "default_value")]
    value: i32,
}

impl Default for MessageRecord {
    fn default() -> Self {
        MessageRecord::from(&MidiMessage::default())
    }
}

impl From<&MidiMessage> for MessageRecord {
    fn from(m: &MidiMessage) -> Self {
        Self {
            kind: kind_code(m.kind),
            channel: m.channel,
            note: m.note,
            velocity: m.velocity,
            controller: m.controller,
            value: m.value,
        }
    }
}

impl From<MessageRecord> for MidiMessage {
    fn from(r: MessageRecord) -> Self {
        Self {
            kind: parse_kind_code(r.kind),
            channel: r.channel,
            note: r.note,
            velocity: r.velocity,
            controller: r.controller,
            value: r.value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HidMappingRecord {
    device_path: String,
    #[serde(default)]
    device_name: String,
    #[serde(default)]
    byte_index: i32,
    #[serde(default = "default_bit_mask")]
    bit_mask: u32,
    trigger_type: i64,
    #[serde(default)]
    trigger_value: i32,
    #[serde(default = "default_true")]
    is_enabled: bool,
    #[serde(default)]
    midi_message: MessageRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileIn {
    hid_mappings: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileOut {
    hid_mappings: Vec<HidMappingRecord>,
}

fn decode_entry(value: Value) -> Result<HidMapping, String> {
    let record: HidMappingRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;

    let trigger = TriggerKind::from_hid_code(record.trigger_type)
        .ok_or_else(|| format!("triggerType {} outside 0-5", record.trigger_type))?;

    Ok(HidMapping {
        device_path: record.device_path,
        device_name: record.device_name,
        byte_index: record.byte_index,
        bit_mask: record.bit_mask,
        trigger,
        trigger_value: record.trigger_value,
        enabled: record.is_enabled,
        message: record.midi_message.into(),
    })
}

/// Parse a HID mapping file, skipping malformed entries
pub fn parse(json: &str) -> Result<Vec<HidMapping>, MappingError> {
    let file: FileIn = serde_json::from_str(json)?;
    Ok(decode_lenient(file.hid_mappings, decode_entry))
}

/// Serialize HID mappings to the file format
pub fn to_json(mappings: &[HidMapping]) -> Result<String, MappingError> {
    let file = FileOut {
        hid_mappings: mappings
            .iter()
            .map(|m| HidMappingRecord {
                device_path: m.device_path.clone(),
                device_name: m.device_name.clone(),
                byte_index: m.byte_index,
                bit_mask: m.bit_mask,
                trigger_type: m.trigger.hid_code().unwrap_or(0) as i64,
                trigger_value: m.trigger_value,
                is_enabled: m.enabled,
                midi_message: (&m.message).into(),
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&file)?)
}

fn default_true() -> bool { true }
fn default_bit_mask() -> u32 { 0xFF }
fn default_note() -> i32 { 60 }
fn default_velocity() -> i32 { 127 }
fn default_controller() -> i32 { 1 }
fn default_value() -> i32 { 64 }
