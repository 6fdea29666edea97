//! KeyMidi - keyboard and HID input to MIDI translator
//!
//! Captures global key transitions and raw HID reports, evaluates them against
//! user-defined trigger rules and emits 3-byte MIDI messages.

pub mod cli;
pub mod config;
pub mod input;
pub mod mapping;
pub mod midi;
pub mod monitor;
pub mod paths;
pub mod pipeline;
pub mod trigger;

pub use config::AppConfig;
pub use pipeline::Pipeline;
