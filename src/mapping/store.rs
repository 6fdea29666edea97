//! In-memory mapping store with change notification

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{hid, key, HidMapping, KeyMapping, MappingError};
use crate::trigger::{TriggerKind, TriggerSource};

/// Active keyboard and HID mappings
///
/// Keyboard mappings are keyed by virtual-key code (at most one per key) and
/// iterate in code order. HID mappings are an ordered list scanned in full for
/// every report. Every mutation bumps a revision observable via
/// [`MappingStore::subscribe`].
pub struct MappingStore {
    keys: BTreeMap<u8, KeyMapping>,
    hid: Vec<HidMapping>,
    revision: watch::Sender<u64>,
    hid_cache_reset: bool,
}

impl Default for MappingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            keys: BTreeMap::new(),
            hid: Vec::new(),
            revision,
            hid_cache_reset: false,
        }
    }

    /// Receiver that observes a new revision after every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn changed(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    // ===== Keyboard mappings =====

    /// Insert or overwrite the mapping for its key
    pub fn add(&mut self, mapping: KeyMapping) {
        debug!("Key mapping set for VK {}", mapping.vk_code);
        self.keys.insert(mapping.vk_code, mapping);
        self.changed();
    }

    pub fn remove(&mut self, vk_code: u8) -> Option<KeyMapping> {
        let removed = self.keys.remove(&vk_code);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    /// Overwrite an existing mapping; returns false when the key has none
    pub fn update(&mut self, mapping: KeyMapping) -> bool {
        match self.keys.get_mut(&mapping.vk_code) {
            Some(slot) => {
                *slot = mapping;
                self.changed();
                true
            }
            None => false,
        }
    }

    /// Move a mapping to a (possibly different) key
    pub fn replace(&mut self, old_vk_code: u8, mapping: KeyMapping) {
        self.keys.remove(&old_vk_code);
        self.keys.insert(mapping.vk_code, mapping);
        self.changed();
    }

    pub fn get(&self, vk_code: u8) -> Option<&KeyMapping> {
        self.keys.get(&vk_code)
    }

    pub fn contains(&self, vk_code: u8) -> bool {
        self.keys.contains_key(&vk_code)
    }

    pub fn all(&self) -> impl Iterator<Item = &KeyMapping> {
        self.keys.values()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.changed();
    }

    /// Replace every keyboard mapping
    pub fn set_keys(&mut self, mappings: Vec<KeyMapping>) {
        self.keys = mappings.into_iter().map(|m| (m.vk_code, m)).collect();
        self.changed();
    }

    /// Keys whose auto-repeats are swallowed system-wide
    pub fn suppressed_keys(&self) -> HashSet<u8> {
        self.keys
            .values()
            .map(|m| m.rule(TriggerKind::KeyDown))
            .filter(|rule| rule.suppress_auto_repeat)
            .filter_map(|rule| match rule.source {
                TriggerSource::Key(vk_code) => Some(vk_code),
                TriggerSource::Hid { .. } => None,
            })
            .collect()
    }

    // ===== HID mappings =====

    pub fn add_hid(&mut self, mapping: HidMapping) {
        debug!("HID mapping added for {} byte {}", mapping.device_path, mapping.byte_index);
        self.hid.push(mapping);
        self.changed();
    }

    pub fn remove_hid(&mut self, index: usize) -> Option<HidMapping> {
        if index >= self.hid.len() {
            return None;
        }
        let removed = self.hid.remove(index);
        self.changed();
        Some(removed)
    }

    pub fn update_hid(&mut self, index: usize, mapping: HidMapping) -> bool {
        match self.hid.get_mut(index) {
            Some(slot) => {
                *slot = mapping;
                self.changed();
                true
            }
            None => false,
        }
    }

    pub fn hid_mapping(&self, index: usize) -> Option<&HidMapping> {
        self.hid.get(index)
    }

    pub fn hid_mappings(&self) -> &[HidMapping] {
        &self.hid
    }

    /// Mappings for one device, in list order
    pub fn hid_mappings_for<'a>(&'a self, device_path: &'a str) -> impl Iterator<Item = &'a HidMapping> {
        self.hid.iter().filter(move |m| m.device_path == device_path)
    }

    /// Remove every HID mapping and request a previous-report cache reset
    pub fn clear_hid(&mut self) {
        self.hid.clear();
        self.hid_cache_reset = true;
        self.changed();
    }

    /// Replace every HID mapping; also requests a previous-report cache reset
    pub fn set_hid(&mut self, mappings: Vec<HidMapping>) {
        self.hid = mappings;
        self.hid_cache_reset = true;
        self.changed();
    }

    /// Whether a cache reset was requested since the last call
    pub fn take_hid_cache_reset(&mut self) -> bool {
        std::mem::take(&mut self.hid_cache_reset)
    }

    // ===== Files =====

    pub async fn load_keys(&mut self, path: impl AsRef<Path>) -> Result<usize, MappingError> {
        let mappings = read_keys(path.as_ref()).await?;
        let count = mappings.len();
        self.set_keys(mappings);
        info!("Loaded {} key mappings from {}", count, path.as_ref().display());
        Ok(count)
    }

    pub async fn save_keys(&self, path: impl AsRef<Path>) -> Result<(), MappingError> {
        let mappings: Vec<KeyMapping> = self.keys.values().cloned().collect();
        fs::write(path.as_ref(), key::to_json(&mappings)?).await?;
        info!("Saved {} key mappings to {}", mappings.len(), path.as_ref().display());
        Ok(())
    }

    pub async fn load_hid(&mut self, path: impl AsRef<Path>) -> Result<usize, MappingError> {
        let mappings = read_hid(path.as_ref()).await?;
        let count = mappings.len();
        self.set_hid(mappings);
        info!("Loaded {} HID mappings from {}", count, path.as_ref().display());
        Ok(count)
    }

    pub async fn save_hid(&self, path: impl AsRef<Path>) -> Result<(), MappingError> {
        fs::write(path.as_ref(), hid::to_json(&self.hid)?).await?;
        info!("Saved {} HID mappings to {}", self.hid.len(), path.as_ref().display());
        Ok(())
    }
}

/// Read and parse a keyboard mapping file
pub async fn read_keys(path: &Path) -> Result<Vec<KeyMapping>, MappingError> {
    let contents = fs::read_to_string(path).await?;
    key::parse(&contents)
}

/// Read and parse a HID mapping file
pub async fn read_hid(path: &Path) -> Result<Vec<HidMapping>, MappingError> {
    let contents = fs::read_to_string(path).await?;
    hid::parse(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiMessage;
    use tempfile::TempDir;

    fn key(vk: u8, suppress: bool) -> KeyMapping {
        let mut m = KeyMapping::new(vk, format!("VK {}", vk));
        m.suppress_repeats = suppress;
        m
    }

    #[test]
    fn test_one_mapping_per_key() {
        let mut store = MappingStore::new();
        store.add(key(65, false));
        let mut again = key(65, false);
        again.key_down_message = MidiMessage::note_on(1, 61, 100);
        store.add(again.clone());

        assert_eq!(store.all().count(), 1);
        assert_eq!(store.get(65), Some(&again));
    }

    #[test]
    fn test_update_requires_existing_key() {
        let mut store = MappingStore::new();
        assert!(!store.update(key(65, false)));
        store.add(key(65, false));
        assert!(store.update(key(65, true)));
        assert!(store.get(65).unwrap().suppress_repeats);
    }

    #[test]
    fn test_replace_moves_mapping() {
        let mut store = MappingStore::new();
        store.add(key(65, false));
        store.replace(65, key(66, false));

        assert!(!store.contains(65));
        assert!(store.contains(66));
    }

    #[test]
    fn test_all_is_ordered_by_code() {
        let mut store = MappingStore::new();
        store.add(key(90, false));
        store.add(key(65, false));
        store.add(key(70, false));

        let codes: Vec<u8> = store.all().map(|m| m.vk_code).collect();
        assert_eq!(codes, vec![65, 70, 90]);
    }

    #[test]
    fn test_suppressed_keys_follow_mappings() {
        let mut store = MappingStore::new();
        store.add(key(65, true));
        store.add(key(66, false));
        store.add(key(67, true));
        assert_eq!(store.suppressed_keys(), HashSet::from([65, 67]));

        store.remove(65);
        assert_eq!(store.suppressed_keys(), HashSet::from([67]));
    }

    #[test]
    fn test_changes_bump_revision() {
        let mut store = MappingStore::new();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        store.add(key(65, false));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        // Removing a missing key is not a change
        store.remove(99);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_hid_crud_and_device_filter() {
        let mut store = MappingStore::new();
        store.add_hid(HidMapping::new("dev-a", 0, TriggerKind::ButtonPress));
        store.add_hid(HidMapping::new("dev-b", 1, TriggerKind::ValueChange));
        store.add_hid(HidMapping::new("dev-a", 2, TriggerKind::ButtonRelease));

        let for_a: Vec<i32> = store.hid_mappings_for("dev-a").map(|m| m.byte_index).collect();
        assert_eq!(for_a, vec![0, 2]);

        assert!(store.update_hid(1, HidMapping::new("dev-b", 5, TriggerKind::ValueLess)));
        assert_eq!(store.hid_mapping(1).unwrap().byte_index, 5);
        assert!(!store.update_hid(7, HidMapping::new("x", 0, TriggerKind::ValueChange)));

        assert!(store.remove_hid(0).is_some());
        assert!(store.remove_hid(10).is_none());
        assert_eq!(store.hid_mappings().len(), 2);
    }

    #[test]
    fn test_clear_hid_requests_cache_reset() {
        let mut store = MappingStore::new();
        store.add_hid(HidMapping::new("dev", 0, TriggerKind::ValueChange));
        assert!(!store.take_hid_cache_reset());

        store.clear_hid();
        assert!(store.hid_mappings().is_empty());
        assert!(store.take_hid_cache_reset());
        assert!(!store.take_hid_cache_reset());
    }

    #[tokio::test]
    async fn test_save_and_load_files() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let keys_path = dir.path().join("mappings.json");
        let hid_path = dir.path().join("hid_mappings.json");

        let mut store = MappingStore::new();
        store.add(key(65, true));
        store.add(key(112, false));
        store.add_hid(HidMapping::new("dev", 3, TriggerKind::ValueEquals));
        store.save_keys(&keys_path).await?;
        store.save_hid(&hid_path).await?;

        let mut loaded = MappingStore::new();
        assert_eq!(loaded.load_keys(&keys_path).await?, 2);
        assert_eq!(loaded.load_hid(&hid_path).await?, 1);
        assert_eq!(loaded.get(65), store.get(65));
        assert_eq!(loaded.hid_mappings(), store.hid_mappings());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let mut store = MappingStore::new();
        let result = store.load_keys("/definitely/not/here/mappings.json").await;
        assert!(matches!(result, Err(MappingError::Io(_))));
    }
}
