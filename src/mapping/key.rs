//! Keyboard mapping entries and the `mappings.json` schema

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_lenient, MappingError};
use crate::midi::{MidiKind, MidiMessage};
use crate::trigger::{TriggerKind, TriggerRule, TriggerSource};

/// Schema version written to new files
pub const FILE_VERSION: &str = "1.0";

/// One keyboard mapping: what a key sends when pressed and released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    pub vk_code: u8,
    pub key_name: String,
    pub enable_key_down: bool,
    pub enable_key_up: bool,
    /// Ignore auto-repeats when deciding whether to send
    pub filter_repeats: bool,
    /// Swallow auto-repeats system-wide
    pub suppress_repeats: bool,
    pub key_down_message: MidiMessage,
    pub key_up_message: MidiMessage,
}

impl KeyMapping {
    /// Mapping with the same defaults a freshly loaded entry gets
    pub fn new(vk_code: u8, key_name: impl Into<String>) -> Self {
        Self {
            vk_code,
            key_name: key_name.into(),
            enable_key_down: true,
            enable_key_up: false,
            filter_repeats: true,
            suppress_repeats: false,
            key_down_message: MidiMessage::default(),
            key_up_message: MidiMessage::default(),
        }
    }

    /// Rule for the key transition `kind` (KeyDown or KeyUp)
    pub fn rule(&self, kind: TriggerKind) -> TriggerRule {
        let (kind, enabled, message) = match kind {
            TriggerKind::KeyUp => (TriggerKind::KeyUp, self.enable_key_up, self.key_up_message),
            _ => (TriggerKind::KeyDown, self.enable_key_down, self.key_down_message),
        };

        TriggerRule {
            source: TriggerSource::Key(self.vk_code),
            kind,
            threshold: 0,
            message,
            enabled,
            suppress_auto_repeat: self.suppress_repeats,
            filter_auto_repeat: self.filter_repeats,
        }
    }
}

/// MIDI message as stored in keyboard mappings (string type names)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    #[serde(rename = "type", default = "default_type")]
    kind: String,
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
            kind: kind_name(m.kind).to_string(),
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
            kind: parse_kind(&r.kind),
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
struct KeyMappingRecord {
    vk_code: i64,
    #[serde(default)]
    key_name: String,
    #[serde(default = "default_true")]
    enable_key_down: bool,
    #[serde(default)]
    enable_key_up: bool,
    #[serde(default = "default_true")]
    filter_repeats: bool,
    #[serde(default)]
    suppress_repeats: bool,
    #[serde(default)]
    key_down_message: MessageRecord,
    #[serde(default)]
    key_up_message: MessageRecord,
}

#[derive(Debug, Deserialize)]
struct FileIn {
    mappings: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct FileOut {
    version: &'static str,
    mappings: Vec<KeyMappingRecord>,
}

/// Wire name of a MIDI kind in keyboard mapping files
pub fn kind_name(kind: MidiKind) -> &'static str {
    match kind {
        MidiKind::NoteOn => "NOTE_ON",
        MidiKind::NoteOff => "NOTE_OFF",
        MidiKind::ControlChange => "CONTROL_CHANGE",
    }
}

/// Parse a wire kind name; anything unrecognised reads as NoteOn
pub fn parse_kind(name: &str) -> MidiKind {
    match name {
        "NOTE_OFF" => MidiKind::NoteOff,
        "CONTROL_CHANGE" => MidiKind::ControlChange,
        _ => MidiKind::NoteOn,
    }
}

fn decode_entry(value: Value) -> Result<KeyMapping, String> {
    let record: KeyMappingRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;

    let vk_code = u8::try_from(record.vk_code)
        .ok()
        .filter(|vk| *vk > 0)
        .ok_or_else(|| format!("vkCode {} outside 1-255", record.vk_code))?;

    Ok(KeyMapping {
        vk_code,
        key_name: record.key_name,
        enable_key_down: record.enable_key_down,
        enable_key_up: record.enable_key_up,
        filter_repeats: record.filter_repeats,
        suppress_repeats: record.suppress_repeats,
        key_down_message: record.key_down_message.into(),
        key_up_message: record.key_up_message.into(),
    })
}

/// Parse a keyboard mapping file, skipping malformed entries
pub fn parse(json: &str) -> Result<Vec<KeyMapping>, MappingError> {
    let file: FileIn = serde_json::from_str(json)?;
    Ok(decode_lenient(file.mappings, decode_entry))
}

/// Serialize keyboard mappings to the file format
pub fn to_json(mappings: &[KeyMapping]) -> Result<String, MappingError> {
    let file = FileOut {
        version: FILE_VERSION,
        mappings: mappings
            .iter()
            .map(|m| KeyMappingRecord {
                vk_code: m.vk_code as i64,
                key_name: m.key_name.clone(),
                enable_key_down: m.enable_key_down,
                enable_key_up: m.enable_key_up,
                filter_repeats: m.filter_repeats,
                suppress_repeats: m.suppress_repeats,
                key_down_message: (&m.key_down_message).into(),
                key_up_message: (&m.key_up_message).into(),
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&file)?)
}

fn default_true() -> bool { true }
fn default_type() -> String { "NOTE_ON".to_string() }
fn default_note() -> i32 { 60 }
fn default_velocity() -> i32 { 127 }
fn default_controller() -> i32 { 1 }
fn default_value() -> i32 { 64 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let mappings = parse(r#"{"mappings":[{"vkCode":65}]}"#).unwrap();
        assert_eq!(mappings.len(), 1);

        let m = &mappings[0];
        assert_eq!(m.vk_code, 65);
        assert!(m.enable_key_down);
        assert!(!m.enable_key_up);
        assert!(m.filter_repeats);
        assert!(!m.suppress_repeats);
        assert_eq!(m.key_down_message, MidiMessage::default());
    }

    #[test]
    fn test_unknown_type_reads_as_note_on() {
        let json = r#"{"mappings":[{"vkCode":66,"keyDownMessage":{"type":"PITCH_BEND","note":10}}]}"#;
        let mappings = parse(json).unwrap();
        assert_eq!(mappings[0].key_down_message.kind, MidiKind::NoteOn);
        assert_eq!(mappings[0].key_down_message.note, 10);
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let json = r#"{"version":"1.0","mappings":[
            {"vkCode":0},
            {"vkCode":300},
            {"keyName":"no code"},
            {"vkCode":"A"},
            {"vkCode":67,"keyName":"C"}
        ]}"#;
        let mappings = parse(json).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].key_name, "C");
    }

    #[test]
    fn test_root_without_mappings_is_a_parse_error() {
        assert!(matches!(parse(r#"{"version":"1.0"}"#), Err(MappingError::Parse(_))));
        assert!(matches!(parse("not json"), Err(MappingError::Parse(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let mut a = KeyMapping::new(65, "A");
        a.enable_key_up = true;
        a.suppress_repeats = true;
        a.key_up_message = MidiMessage::note_off(0, 60, 0);

        let mut b = KeyMapping::new(112, "F1");
        b.filter_repeats = false;
        b.key_down_message = MidiMessage::control_change(3, 20, 127);

        let json = to_json(&[a.clone(), b.clone()]).unwrap();
        assert!(json.contains("\"version\": \"1.0\""));
        assert!(json.contains("\"CONTROL_CHANGE\""));

        let back = parse(&json).unwrap();
        assert_eq!(back, vec![a, b]);
    }

    #[test]
    fn test_rules_carry_enable_flags() {
        let mut m = KeyMapping::new(65, "A");
        m.suppress_repeats = true;
        let (down, up) = (m.rule(TriggerKind::KeyDown), m.rule(TriggerKind::KeyUp));

        assert_eq!(down.kind, TriggerKind::KeyDown);
        assert!(down.enabled);
        assert!(down.suppress_auto_repeat);
        assert_eq!(up.kind, TriggerKind::KeyUp);
        assert!(!up.enabled);
        assert_eq!(up.source, TriggerSource::Key(65));
    }
}
