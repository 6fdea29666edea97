//! hidapi-backed device access

use hidapi::{HidApi, HidDevice};
use std::collections::BTreeMap;
use std::ffi::CString;
use tracing::{debug, warn};

use super::{HidDeviceInfo, HidError, HidTransport};

/// hidapi messages that mean the device went away
const DISCONNECT_MARKERS: [&str; 6] = [
    "not connected",
    "no such device",
    "not found",
    "disconnected",
    "broken pipe",
    "enodev",
];

/// Map a hidapi read error to disconnect or transient read failure
fn classify_read_error(e: hidapi::HidError) -> HidError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if DISCONNECT_MARKERS.iter().any(|m| lower.contains(m)) {
        HidError::DeviceDisconnected(msg)
    } else {
        HidError::Read(msg)
    }
}

fn display_name(product: Option<&str>, vendor_id: u16, product_id: u16) -> String {
    match product.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("HID Device (VID:{:04x} PID:{:04x})", vendor_id, product_id),
    }
}

/// Largest report descriptor the HID class allows
const MAX_DESCRIPTOR_LEN: usize = 4096;

/// Byte length of the longest input report declared by a report descriptor
///
/// Counts the Report Size × Report Count bits of every Input item per report
/// ID and adds the ID prefix byte when the device uses report IDs. Returns
/// `None` for truncated descriptors or ones declaring no input.
pub fn input_report_len(descriptor: &[u8]) -> Option<usize> {
    let mut bits: BTreeMap<u32, usize> = BTreeMap::new();
    let (mut report_size, mut report_count, mut report_id) = (0usize, 0usize, 0u32);
    let mut uses_report_ids = false;

    let mut i = 0;
    while i < descriptor.len() {
        let prefix = descriptor[i];

        // Long item: prefix, data size, tag, data
        if prefix == 0xFE {
            let data_len = *descriptor.get(i + 1)? as usize;
            i += 3 + data_len;
            continue;
        }

        let data_len = match prefix & 0x03 {
            3 => 4,
            n => n as usize,
        };
        let data = descriptor.get(i + 1..i + 1 + data_len)?;
        let value = data.iter().rev().fold(0u32, |acc, b| (acc << 8) | *b as u32);

        match ((prefix >> 2) & 0x03, prefix >> 4) {
            // Main: Input
            (0, 0x8) => *bits.entry(report_id).or_default() += report_size * report_count,
            // Global: Report Size, Report ID, Report Count
            (1, 0x7) => report_size = value as usize,
            (1, 0x8) => {
                report_id = value;
                uses_report_ids = true;
            }
            (1, 0x9) => report_count = value as usize,
            _ => {}
        }

        i += 1 + data_len;
    }

    let longest = bits.values().copied().max().filter(|&b| b > 0)?;
    Some(longest.div_ceil(8) + usize::from(uses_report_ids))
}

/// Snapshot of the HID devices currently attached
pub fn list_devices() -> Result<Vec<HidDeviceInfo>, HidError> {
    let api = HidApi::new().map_err(|e| HidError::Backend(e.to_string()))?;

    let devices: Vec<HidDeviceInfo> = api
        .device_list()
        .map(|info| HidDeviceInfo {
            name: display_name(info.product_string(), info.vendor_id(), info.product_id()),
            path: info.path().to_string_lossy().to_string(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            usage_page: info.usage_page(),
            usage: info.usage(),
        })
        .collect();

    debug!("Enumerated {} HID devices", devices.len());
    Ok(devices)
}

/// Open device read through hidapi
pub struct HidApiTransport {
    device: HidDevice,
    report_len: Option<usize>,
}

impl HidApiTransport {
    pub fn open(path: &str) -> Result<Self, HidError> {
        let open_err = |reason: String| HidError::DeviceOpen {
            path: path.to_string(),
            reason,
        };

        let c_path = CString::new(path).map_err(|e| open_err(e.to_string()))?;
        let api = HidApi::new().map_err(|e| open_err(e.to_string()))?;
        let device = api.open_path(&c_path).map_err(|e| open_err(e.to_string()))?;

        let mut descriptor = vec![0u8; MAX_DESCRIPTOR_LEN];
        let report_len = match device.get_report_descriptor(&mut descriptor) {
            Ok(len) => input_report_len(&descriptor[..len.min(descriptor.len())]),
            Err(e) => {
                warn!("No report descriptor for {}: {}", path, e);
                None
            }
        };
        debug!("{} declares input reports of {:?} bytes", path, report_len);

        Ok(Self { device, report_len })
    }
}

impl HidTransport for HidApiTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HidError> {
        self.device.read_timeout(buf, 0).map_err(classify_read_error)
    }

    fn report_len(&self) -> Option<usize> {
        self.report_len
    }
}
