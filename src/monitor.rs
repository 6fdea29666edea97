//! Raw-event notifications for the UI layer
//!
//! The pipeline reports what it sees and does through a [`Notifier`]. Pushing
//! never blocks: if the consumer is slow or gone, notifications are dropped,
//! MIDI output is unaffected.

use chrono::{Local, NaiveTime};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use tracing::trace;

use crate::input::hid::HidReport;
use crate::input::keyboard::{key_name, KeyEvent};
use crate::midi::{format_hex, MidiMessage};

/// Default capacity of the notification channel
pub const DEFAULT_CAPACITY: usize = 256;

/// Something worth showing to the user
#[derive(Debug, Clone)]
pub enum Notification {
    KeyEvent(KeyEvent),
    HidReport(HidReport),
    MidiSent {
        /// What fired, e.g. `VK_065 DOWN` or a device path and byte index
        origin: String,
        message: MidiMessage,
        bytes: [u8; 3],
    },
    DeviceDisconnected { path: String },
    HookUnavailable { reason: String },
    Error { message: String },
}

/// Non-blocking notification sender
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<Sender<Notification>>,
}

impl Notifier {
    /// Notifier paired with a bounded receiver
    pub fn channel(capacity: usize) -> (Self, Receiver<Notification>) {
        let (tx, rx) = channel::bounded(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// Notifier that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, notification: Notification) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("Notification channel full, dropping"),
            Err(TrySendError::Disconnected(_)) => trace!("Notification receiver gone"),
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(Notification::Error {
            message: message.into(),
        });
    }
}

/// `[hh:mm:ss.zzz] VK_065 (0x41) DOWN [REPEAT] - A`
pub fn format_key_event_at(event: &KeyEvent, time: NaiveTime) -> String {
    format!(
        "[{}] VK_{:03} (0x{:02X}) {}{} - {}",
        time.format("%H:%M:%S%.3f"),
        event.vk_code,
        event.vk_code,
        if event.is_key_down { "DOWN" } else { "UP" },
        if event.is_auto_repeat { " [REPEAT]" } else { "" },
        key_name(event.vk_code)
    )
}

/// Key event line stamped with the current local time
pub fn format_key_event(event: &KeyEvent) -> String {
    format_key_event_at(event, Local::now().time())
}

/// `[hh:mm:ss.zzz] <path> [len] 01 02 03`
pub fn format_hid_report_at(report: &HidReport, time: NaiveTime) -> String {
    format!(
        "[{}] {} [{}] {}",
        time.format("%H:%M:%S%.3f"),
        report.device_path,
        report.payload.len(),
        format_hex(&report.payload)
    )
}

/// Console view over the notification stream
///
/// Hiding repeats only affects what is shown.
#[derive(Debug, Clone)]
pub struct MonitorView {
    pub enabled: bool,
    pub ignore_repeats: bool,
    event_count: u64,
}

impl MonitorView {
    pub fn new(ignore_repeats: bool) -> Self {
        Self {
            enabled: true,
            ignore_repeats,
            event_count: 0,
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Line to print for a notification, if any
    pub fn render(&mut self, notification: &Notification) -> Option<String> {
        self.render_at(notification, Local::now().time())
    }

    pub fn render_at(&mut self, notification: &Notification, time: NaiveTime) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let line = match notification {
            Notification::KeyEvent(event) => {
                if self.ignore_repeats && event.is_auto_repeat {
                    return None;
                }
                self.event_count += 1;
                format_key_event_at(event, time)
            }
            Notification::HidReport(report) => {
                self.event_count += 1;
                format_hid_report_at(report, time)
            }
            Notification::MidiSent { origin, message, bytes } => {
                format!("  -> {} [{}] ({})", message, format_hex(bytes), origin)
            }
            Notification::DeviceDisconnected { path } => format!("Device disconnected: {}", path),
            Notification::HookUnavailable { reason } => format!("Keyboard hook unavailable: {}", reason),
            Notification::Error { message } => format!("Error: {}", message),
        };

        Some(line)
    }
}
