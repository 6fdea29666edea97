//! Event dispatch: input events → trigger evaluation → MIDI output
//!
//! The pipeline runs on the application's event loop. It owns the mapping
//! store, the per-device previous-report cache and the MIDI sink. Every
//! failure on the way out (no port, send error) is logged, surfaced as a
//! notification and otherwise ignored; the pipeline keeps going.

use tracing::{debug, trace, warn};

use crate::input::hid::{HidEvent, HidReport, PreviousReportCache};
use crate::input::keyboard::KeyEvent;
use crate::mapping::MappingStore;
use crate::midi::{format_hex, MidiError, MidiMessage, MidiSink};
use crate::monitor::{Notification, Notifier};
use crate::trigger::{evaluate, extract_value, Sample, TriggerKind, TriggerSource};

pub struct Pipeline {
    store: MappingStore,
    cache: PreviousReportCache,
    /// None while running without MIDI output
    sink: Option<Box<dyn MidiSink>>,
    notifier: Notifier,
}

impl Pipeline {
    pub fn new(store: MappingStore, sink: Option<Box<dyn MidiSink>>, notifier: Notifier) -> Self {
        Self {
            store,
            cache: PreviousReportCache::new(),
            sink,
            notifier,
        }
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MappingStore {
        &mut self.store
    }

    pub fn cache(&self) -> &PreviousReportCache {
        &self.cache
    }

    pub fn set_sink(&mut self, sink: Box<dyn MidiSink>) {
        self.sink = Some(sink);
    }

    pub fn has_midi_output(&self) -> bool {
        self.sink.is_some()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Apply the keyboard mapping for one key event; returns messages sent
    pub fn handle_key_event(&mut self, event: &KeyEvent) -> usize {
        self.notifier.notify(Notification::KeyEvent(*event));

        let Some(mapping) = self.store.get(event.vk_code) else {
            return 0;
        };

        let kind = if event.is_key_down {
            TriggerKind::KeyDown
        } else {
            TriggerKind::KeyUp
        };
        let rule = mapping.rule(kind);

        if event.is_auto_repeat && rule.filter_auto_repeat {
            trace!("Filtered auto-repeat of VK {}", event.vk_code);
            return 0;
        }

        if !evaluate(&rule, Sample::Key { is_down: event.is_key_down }) {
            return 0;
        }

        let origin = format!(
            "{} {}",
            rule.source,
            if event.is_key_down { "DOWN" } else { "UP" }
        );
        usize::from(self.emit(origin, rule.message))
    }

    /// Evaluate every enabled HID mapping for the report's device
    ///
    /// The cache always ends up holding this report, whether or not anything
    /// fired. Returns messages sent.
    pub fn handle_hid_report(&mut self, report: &HidReport) -> usize {
        if self.store.take_hid_cache_reset() {
            debug!("HID mappings replaced, resetting report cache");
            self.cache.reset();
        }

        self.notifier.notify(Notification::HidReport(report.clone()));

        let previous = self.cache.previous(&report.device_path);
        let fired: Vec<(String, MidiMessage)> = self
            .store
            .hid_mappings_for(&report.device_path)
            .map(|m| m.rule())
            .filter_map(|rule| {
                let TriggerSource::Hid { byte_index, bit_mask, .. } = rule.source else {
                    return None;
                };
                let sample = Sample::Value {
                    current: extract_value(&report.payload, byte_index, bit_mask),
                    previous: extract_value(previous, byte_index, bit_mask),
                };
                evaluate(&rule, sample).then(|| (rule.source.to_string(), rule.message))
            })
            .collect();

        self.cache.update(&report.device_path, &report.payload);

        let mut sent = 0;
        for (origin, message) in fired {
            if self.emit(origin, message) {
                sent += 1;
            }
        }
        sent
    }

    /// Route one poller event
    pub fn handle_hid_event(&mut self, event: HidEvent) {
        match event {
            HidEvent::Report(report) => {
                self.handle_hid_report(&report);
            }
            HidEvent::Disconnected { path } => {
                self.cache.remove(&path);
                self.notifier.notify(Notification::DeviceDisconnected { path });
            }
            HidEvent::ReadError { path, message } => {
                self.notifier.error(format!("{}: {}", path, message));
            }
        }
    }

    /// Encode and send; failures are reported and the message dropped
    fn emit(&mut self, origin: String, message: MidiMessage) -> bool {
        let bytes = message.encode();

        let result = match self.sink.as_mut() {
            Some(sink) => sink.send(&bytes),
            None => Err(MidiError::PortNotOpen),
        };

        match result {
            Ok(()) => {
                debug!("{} -> {} [{}]", origin, message, format_hex(&bytes));
                self.notifier.notify(Notification::MidiSent { origin, message, bytes });
                true
            }
            Err(e) => {
                warn!("Dropped MIDI message from {}: {}", origin, e);
                self.notifier.error(e.to_string());
                false
            }
        }
    }
}
