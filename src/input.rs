//! Input capture: system-wide keyboard hook and HID report polling

pub mod hid;
pub mod keyboard;
