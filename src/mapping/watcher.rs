//! Mapping file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::store::{read_hid, read_keys};
use super::{HidMapping, KeyMapping};

/// Delay between a modify event and the reload, letting writers finish
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Freshly parsed mapping set
#[derive(Debug, Clone)]
pub enum MappingUpdate {
    Keys(Vec<KeyMapping>),
    Hid(Vec<HidMapping>),
}

#[derive(Debug, Clone, Copy)]
enum FileKind {
    Keys,
    Hid,
}

/// Watches the keyboard and HID mapping files and sends reloaded sets
pub struct MappingWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<MappingUpdate>,
}

impl MappingWatcher {
    /// Watch whichever of the two files exist
    pub fn new(key_file: &Path, hid_file: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel(10);

        let key_file = key_file.to_path_buf();
        let hid_file = hid_file.to_path_buf();
        let (key_cb, hid_cb) = (key_file.clone(), hid_file.clone());

        // notify callbacks run on their own OS thread, outside the runtime
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_)) {
                        return;
                    }
                    debug!("Mapping file modified: {:?}", event.paths);

                    for path in &event.paths {
                        let kind = if same_file(path, &key_cb) {
                            FileKind::Keys
                        } else if same_file(path, &hid_cb) {
                            FileKind::Hid
                        } else {
                            continue;
                        };

                        let path = path.clone();
                        let tx = tx.clone();
                        runtime_handle.spawn(async move {
                            tokio::time::sleep(DEBOUNCE).await;
                            reload(kind, &path, tx).await;
                        });
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        for file in [&key_file, &hid_file] {
            if file.exists() {
                watcher
                    .watch(file, RecursiveMode::NonRecursive)
                    .with_context(|| format!("Failed to watch mapping file: {}", file.display()))?;
                info!("Mapping file watcher started for: {}", file.display());
            } else {
                debug!("Not watching missing mapping file: {}", file.display());
            }
        }

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next reloaded set
    /// Returns None if the watcher has been closed
    pub async fn next_update(&mut self) -> Option<MappingUpdate> {
        self.rx.recv().await
    }
}

async fn reload(kind: FileKind, path: &Path, tx: mpsc::Sender<MappingUpdate>) {
    let update = match kind {
        FileKind::Keys => read_keys(path).await.map(MappingUpdate::Keys),
        FileKind::Hid => read_hid(path).await.map(MappingUpdate::Hid),
    };

    match update {
        Ok(update) => {
            info!("Mappings reloaded from {}", path.display());
            if let Err(e) = tx.send(update).await {
                error!("Failed to send mapping update: {}", e);
            }
        }
        Err(e) => {
            warn!("Failed to reload {} (keeping old mappings): {}", path.display(), e);
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b
        || match (a.canonicalize(), b.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => a.file_name() == b.file_name(),
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mapping_watcher_reloads_keys() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let key_path = temp_dir.path().join("mappings.json");
        let hid_path = temp_dir.path().join("hid_mappings.json");

        fs::write(&key_path, r#"{"version":"1.0","mappings":[{"vkCode":65}]}"#)?;

        let mut watcher = MappingWatcher::new(&key_path, &hid_path)?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &key_path,
            r#"{"version":"1.0","mappings":[{"vkCode":65},{"vkCode":66,"keyName":"B"}]}"#,
        )?;

        let update = tokio::time::timeout(Duration::from_secs(2), watcher.next_update()).await?;

        match update {
            Some(MappingUpdate::Keys(keys)) => {
                assert_eq!(keys.len(), 2);
                assert_eq!(keys[1].key_name, "B");
            }
            other => panic!("expected a keyboard mapping update, got {:?}", other),
        }

        Ok(())
    }
}
