use crate::settings::{SavedConnection, Settings};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Owns the settings file. Shared between the manager and the WiFi transport.
pub struct SettingsStore {
    settings: Mutex<Settings>,
    settings_path: Option<PathBuf>,
}

impl SettingsStore {
    /// Load from the user config directory, falling back to defaults
    pub fn load_default() -> Self {
        match Self::default_path() {
            Ok(path) => Self::load(path),
            Err(e) => {
                warn!("No settings directory ({}); settings will not persist", e);
                Self::in_memory(Settings::default())
            }
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                if path.exists() {
                    warn!("Could not read {} ({}); using defaults", path.display(), e);
                }
                Settings::default()
            }
        };
        Self {
            settings: Mutex::new(settings),
            settings_path: Some(path),
        }
    }

    /// Settings that are never written to disk
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            settings_path: None,
        }
    }

    fn default_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("rc-link");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.get())?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    /// Apply `change` and persist. Write failures are logged.
    pub fn update<F: FnOnce(&mut Settings)>(&self, change: F) {
        change(&mut self.lock());
        if let Err(e) = self.save() {
            warn!("Failed to save settings: {}", e);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remember a WiFi endpoint that just connected
    pub fn record_connection(&self, ip: &str, port: u16, name: Option<String>) {
        info!("[CONN] Saved connection {}:{}", ip, port);
        self.update(|s| s.saved_wifi_connections.record(ip, port, name));
    }

    pub fn saved_connections(&self) -> Vec<SavedConnection> {
        self.lock().saved_wifi_connections.by_recent_use()
    }

    pub fn find_connection(&self, ip: &str, port: u16) -> Option<SavedConnection> {
        self.lock().saved_wifi_connections.find(ip, port).cloned()
    }

    pub fn remove_connection(&self, ip: &str, port: u16) -> bool {
        let mut removed = false;
        self.update(|s| removed = s.saved_wifi_connections.remove(ip, port));
        removed
    }

    pub fn clear_connections(&self) {
        self.update(|s| s.saved_wifi_connections.clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("rc-link-test-{}-{}", std::process::id(), name));
        path.push("settings.json");
        path
    }

    #[test]
    fn test_round_trip_through_file() {
        let path = temp_path("round-trip");
        let store = SettingsStore::load(&path);
        store.update(|s| s.connection_type = TransportKind::Classic);
        store.record_connection("192.168.4.1", 80, None);

        let reloaded = SettingsStore::load(&path);
        assert_eq!(reloaded.get().connection_type, TransportKind::Classic);
        let saved = reloaded.saved_connections();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "RC_Car_192.168.4.1");

        let _ = fs::remove_dir_all(path.parent().expect("dir"));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let path = temp_path("corrupt");
        fs::create_dir_all(path.parent().expect("dir")).expect("mkdir");
        fs::write(&path, "{ not json").expect("write");

        let store = SettingsStore::load(&path);
        assert_eq!(store.get(), Settings::default());

        let _ = fs::remove_dir_all(path.parent().expect("dir"));
    }

    #[test]
    fn test_saved_connection_operations() {
        let store = SettingsStore::in_memory(Settings::default());
        store.record_connection("10.0.0.1", 80, Some("Buggy".into()));
        store.record_connection("10.0.0.2", 8080, None);
        store.record_connection("10.0.0.1", 80, None);

        assert_eq!(store.saved_connections().len(), 2);
        assert_eq!(store.find_connection("10.0.0.1", 80).map(|c| c.name), Some("Buggy".into()));
        assert_eq!(store.saved_connections()[0].ip, "10.0.0.1");
        assert!(store.remove_connection("10.0.0.2", 8080));
        assert_eq!(store.saved_connections().len(), 1);

        store.clear_connections();
        assert!(store.saved_connections().is_empty());
        assert!(store.save().is_ok());
    }
}
