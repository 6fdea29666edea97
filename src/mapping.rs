//! Keyboard and HID mapping rules
//!
//! Mappings are what the user configures: "key A sends Note 60", "byte 3 of
//! this gamepad sends CC 7 when it changes". They are persisted as JSON files
//! whose field names and integer codes stay compatible with files written by
//! earlier releases, and are turned into [`TriggerRule`](crate::trigger::TriggerRule)s
//! for evaluation.

pub mod hid;
pub mod key;
pub mod store;
pub mod watcher;

use serde_json::Value;
use tracing::warn;

pub use hid::HidMapping;
pub use key::KeyMapping;
pub use store::MappingStore;
pub use watcher::{MappingUpdate, MappingWatcher};

/// Errors raised while reading or writing mapping files
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("malformed mapping rule #{index}: {reason}")]
    MalformedRuleData { index: usize, reason: String },
    #[error("mapping file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid mapping file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Decode each element of a JSON array on its own, skipping the ones that fail
///
/// A broken rule never prevents the remaining rules from loading.
pub(crate) fn decode_lenient<T, F>(entries: Vec<Value>, mut convert: F) -> Vec<T>
where
    F: FnMut(Value) -> Result<T, String>,
{
    let mut decoded = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        match convert(entry) {
            Ok(item) => decoded.push(item),
            Err(reason) => {
                let err = MappingError::MalformedRuleData { index, reason };
                warn!("Skipping {}", err);
            }
        }
    }

    decoded
}

