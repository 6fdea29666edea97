//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Portable mode**: a `.portable` marker file next to the executable keeps
//!   config, mapping files and logs in the executable's directory.
//! - **Installed mode** (default): data lives in `%APPDATA%\KeyMidi` (or the
//!   platform equivalent from `dirs::data_dir()`).

use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for directories in installed mode
const APP_NAME: &str = "KeyMidi";

/// Application paths for config, mapping files and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the YAML settings file
    pub config: PathBuf,
    /// Keyboard mapping file
    pub key_mappings: PathBuf,
    /// HID mapping file
    pub hid_mappings: PathBuf,
    pub logs_dir: PathBuf,
    /// Whether running in portable mode (data next to exe)
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// Debug builds use the current directory when it holds a `config.yaml`,
    /// so `cargo run` picks up the project's own files.
    ///
    /// Called before logging is initialized, hence `eprintln!`.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join("config.yaml").exists() {
                eprintln!("[paths] Running in DEV mode (config.yaml found in {})", cwd.display());
                return Self::in_dir(&cwd, true);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::in_dir(&exe_dir, true);
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: dirs::data_dir() returned None, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!("[paths] Running in INSTALLED mode (data dir: {})", app_data.display());

        Self::in_dir(&app_data, false)
    }

    /// Standard layout rooted at `dir`
    pub fn in_dir(dir: &Path, is_portable: bool) -> Self {
        Self {
            config: dir.join("config.yaml"),
            key_mappings: dir.join("mappings.json"),
            hid_mappings: dir.join("hid_mappings.json"),
            logs_dir: dir.join("logs"),
            is_portable,
        }
    }

    /// Use the config file's directory as the data root
    pub fn with_config(config: impl Into<PathBuf>) -> Self {
        let config = config.into();
        let base = config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config,
            ..Self::in_dir(&base, true)
        }
    }

    /// Get the base directory (for displaying in logs)
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Point the mapping files at the names from the settings
    ///
    /// Relative names resolve against [`Self::base_dir`].
    pub fn apply_mapping_files(&mut self, key_file: &str, hid_file: &str) {
        let base = self.base_dir();
        self.key_mappings = base.join(key_file);
        self.hid_mappings = base.join(hid_file);
    }

    /// Ensure the data and logs directories exist.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [self.base_dir(), self.logs_dir.clone()] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }
}
