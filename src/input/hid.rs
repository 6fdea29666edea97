//! HID device input
//!
//! A [`HidPoller`] owns one open device and reads input reports at a fixed
//! cadence, emitting [`HidEvent`]s. Reading goes through the [`HidTransport`]
//! trait so the poller can run against hidapi or a scripted device.

pub mod cache;
pub mod device;
pub mod poller;

use std::time::Instant;

pub use cache::PreviousReportCache;
pub use device::{list_devices, HidApiTransport};
pub use poller::{poll_once, HidPoller, PollOutcome};

/// Default poll cadence
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default read buffer size (largest full-speed USB report)
pub const DEFAULT_REPORT_LEN: usize = 64;

/// HID errors
#[derive(Debug, thiserror::Error)]
pub enum HidError {
    #[error("failed to open HID device '{path}': {reason}")]
    DeviceOpen { path: String, reason: String },
    #[error("HID device disconnected: {0}")]
    DeviceDisconnected(String),
    #[error("HID read error: {0}")]
    Read(String),
    #[error("HID backend error: {0}")]
    Backend(String),
}

/// One input report read from a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidReport {
    pub device_path: String,
    pub payload: Vec<u8>,
    pub timestamp: Instant,
}

impl HidReport {
    pub fn new(device_path: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            device_path: device_path.into(),
            payload,
            timestamp: Instant::now(),
        }
    }

    /// Report ID (first payload byte), 0 for an empty payload
    pub fn report_id(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }
}

/// Snapshot of an attached device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidDeviceInfo {
    pub name: String,
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
}

/// What a poller reports to the event loop
#[derive(Debug, Clone)]
pub enum HidEvent {
    Report(HidReport),
    /// The device is gone; its poller has stopped
    Disconnected { path: String },
    /// A read failed but polling continues
    ReadError { path: String, message: String },
}

/// Source of raw input reports for one device
pub trait HidTransport: Send {
    /// Non-blocking read of one report into `buf`
    ///
    /// Returns the number of bytes read, 0 when nothing is pending.
    /// Fails with [`HidError::DeviceDisconnected`] when the device is gone and
    /// [`HidError::Read`] for anything else.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HidError>;

    /// Longest input report the device declares, including the report ID byte
    fn report_len(&self) -> Option<usize> {
        None
    }
}
