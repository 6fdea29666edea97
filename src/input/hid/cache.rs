use std::collections::HashMap;

/// Last report payload seen per device path
#[derive(Debug, Default)]
pub struct PreviousReportCache {
    reports: HashMap<String, Vec<u8>>,
}

impl PreviousReportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Previous payload for a device; empty when none was seen yet
    pub fn previous(&self, device_path: &str) -> &[u8] {
        self.reports
            .get(device_path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn update(&mut self, device_path: &str, payload: &[u8]) {
        match self.reports.get_mut(device_path) {
            Some(entry) => {
                entry.clear();
                entry.extend_from_slice(payload);
            }
            None => {
                self.reports.insert(device_path.to_string(), payload.to_vec());
            }
        }
    }

    pub fn remove(&mut self, device_path: &str) {
        self.reports.remove(device_path);
    }

    pub fn reset(&mut self) {
        self.reports.clear();
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_entry_per_device() {
        let mut cache = PreviousReportCache::new();
        assert!(cache.previous("a").is_empty());

        cache.update("a", &[1, 2]);
        cache.update("a", &[3]);
        cache.update("b", &[9]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.previous("a"), &[3]);

        cache.remove("b");
        assert_eq!(cache.len(), 1);

        cache.reset();
        assert!(cache.is_empty());
    }
}
