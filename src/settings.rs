//! Persistent key/value settings shared with the POS frontend.
//!
//! Backed by a single JSON object on disk (`config.json` in the data
//! directory). Every write replaces the file atomically through a temp file
//! and rename, so readers never observe a partial update. Absent keys resolve
//! to the defaults documented on each accessor.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult};

pub const KEY_STARTUP_PATH: &str = "startupPath";
pub const KEY_SELECTED_PRINTER: &str = "selectedPrinter";
pub const KEY_PRINTER_IP: &str = "printerIP";
pub const KEY_SELECTED_TIMECLOCK_PRINTER: &str = "selectedTimeclockPrinter";
pub const KEY_CLOCKIN_ONLY_MODE: &str = "clockinOnlyMode";
pub const KEY_PHOTO_DIRECTORY: &str = "photoDirectory";
pub const KEY_DIRECTORY_PATH: &str = "directoryPath";

pub const SETTINGS_FILE: &str = "config.json";

// ---------------------------------------------------------------------------
// Startup views
// ---------------------------------------------------------------------------

/// Screens the frontend can boot into; stored as a URL fragment suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupView {
    Home,
    Kds,
    KdsPickup,
    KitchenPos,
    Pos,
    KdsRecall,
}

impl StartupView {
    pub const ALL: [StartupView; 6] = [
        StartupView::Home,
        StartupView::Kds,
        StartupView::KdsPickup,
        StartupView::KitchenPos,
        StartupView::Pos,
        StartupView::KdsRecall,
    ];

    pub fn path(self) -> &'static str {
        match self {
            StartupView::Home => "",
            StartupView::Kds => "#kds",
            StartupView::KdsPickup => "#kds-pickup",
            StartupView::KitchenPos => "#pos-kitchen",
            StartupView::Pos => "#pos",
            StartupView::KdsRecall => "#kds-recall",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StartupView::Home => "Home",
            StartupView::Kds => "KDS",
            StartupView::KdsPickup => "KDS Pickup",
            StartupView::KitchenPos => "Kitchen POS",
            StartupView::Pos => "POS",
            StartupView::KdsRecall => "KDS Recall",
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Settings {
    path: Option<PathBuf>,
    values: Mutex<Map<String, Value>>,
}

impl Settings {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable or corrupt one is logged and treated as empty so the
    /// register still boots.
    pub fn open(path: impl Into<PathBuf>) -> BridgeResult<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!(path = %path.display(), "settings file is not a JSON object, starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = values.len(), "settings loaded");
        Ok(Self {
            path: Some(path),
            values: Mutex::new(values),
        })
    }

    /// Non-persistent store, for tests and headless tooling.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(Map::new()),
        }
    }

    fn lock(&self) -> BridgeResult<std::sync::MutexGuard<'_, Map<String, Value>>> {
        self.values
            .lock()
            .map_err(|e| BridgeError::Settings(format!("lock poisoned: {e}")))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().ok()?.get(key).cloned()
    }

    /// String value for `key`; `None` when absent, null, or blank.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => s == "true",
            _ => default,
        }
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> BridgeResult<()> {
        let value = value.into();
        self.update(|map| {
            map.insert(key.to_string(), value);
        })
    }

    /// Remove `key`. Deleting an absent key is not an error.
    pub fn delete(&self, key: &str) -> BridgeResult<()> {
        self.update(|map| {
            map.remove(key);
        })
    }

    /// Apply `edit` to a copy of the store and commit it as one write. The
    /// in-memory view only changes once the file has been replaced, so a
    /// failed write leaves both untouched.
    pub fn update(&self, edit: impl FnOnce(&mut Map<String, Value>)) -> BridgeResult<()> {
        let mut values = self.lock()?;
        let mut next = values.clone();
        edit(&mut next);
        if next == *values {
            return Ok(());
        }
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn persist(&self, values: &Map<String, Value>) -> BridgeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(values)?;
        std::fs::write(&tmp, body)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(BridgeError::Settings(format!(
                "replace {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Typed accessors
    // -----------------------------------------------------------------------

    /// Suffix appended to the resolved frontend URL. Defaults to `""`.
    pub fn startup_path(&self) -> String {
        self.get_str(KEY_STARTUP_PATH).unwrap_or_default()
    }

    /// Store the startup suffix; an empty path is stored as `/`.
    pub fn set_startup_path(&self, path: &str) -> BridgeResult<()> {
        let path = if path.is_empty() { "/" } else { path };
        self.set(KEY_STARTUP_PATH, path)
    }

    pub fn set_startup_view(&self, view: StartupView) -> BridgeResult<()> {
        self.set_startup_path(view.path())
    }

    /// Defaults to `false`.
    pub fn clockin_only_mode(&self) -> bool {
        self.get_bool(KEY_CLOCKIN_ONLY_MODE, false)
    }

    pub fn set_clockin_only_mode(&self, enabled: bool) -> BridgeResult<()> {
        self.set(KEY_CLOCKIN_ONLY_MODE, enabled)
    }

    pub fn photo_directory(&self) -> Option<PathBuf> {
        self.get_str(KEY_PHOTO_DIRECTORY).map(PathBuf::from)
    }

    pub fn set_photo_directory(&self, dir: &Path) -> BridgeResult<()> {
        self.set(KEY_PHOTO_DIRECTORY, dir.to_string_lossy().into_owned())
    }

    /// Export directory for files written on behalf of the frontend.
    /// Defaults to `""` (unset).
    pub fn directory_path(&self) -> String {
        self.get_str(KEY_DIRECTORY_PATH).unwrap_or_default()
    }

    pub fn set_directory_path(&self, dir: &Path) -> BridgeResult<()> {
        self.set(KEY_DIRECTORY_PATH, dir.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_absent_keys() {
        let s = Settings::in_memory();
        assert_eq!(s.startup_path(), "");
        assert!(!s.clockin_only_mode());
        assert_eq!(s.directory_path(), "");
        assert!(s.photo_directory().is_none());
        assert!(s.get_str(KEY_SELECTED_PRINTER).is_none());
    }

    #[test]
    fn test_empty_startup_path_stored_as_slash() {
        let s = Settings::in_memory();
        s.set_startup_path("").unwrap();
        assert_eq!(s.startup_path(), "/");
        s.set_startup_view(StartupView::KdsRecall).unwrap();
        assert_eq!(s.startup_path(), "#kds-recall");
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let s = Settings::open(&path).unwrap();
        s.set(KEY_SELECTED_PRINTER, "Receipt Printer 12").unwrap();
        s.set_clockin_only_mode(true).unwrap();
        s.set(KEY_PRINTER_IP, "10.10.10.12").unwrap();
        s.delete(KEY_PRINTER_IP).unwrap();
        drop(s);

        let reopened = Settings::open(&path).unwrap();
        assert_eq!(
            reopened.get_str(KEY_SELECTED_PRINTER).as_deref(),
            Some("Receipt Printer 12")
        );
        assert!(reopened.clockin_only_mode());
        assert!(reopened.get(KEY_PRINTER_IP).is_none());

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != SETTINGS_FILE)
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind");
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[not an object").unwrap();
        let s = Settings::open(&path).unwrap();
        assert!(s.get(KEY_STARTUP_PATH).is_none());
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let s = Settings::in_memory();
        assert!(s.delete(KEY_SELECTED_TIMECLOCK_PRINTER).is_ok());
    }

    #[test]
    fn test_failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        let s = Settings::open(blocker.join(SETTINGS_FILE)).unwrap();
        // a regular file where the settings directory should go
        std::fs::write(&blocker, "").unwrap();

        assert!(s.set(KEY_SELECTED_PRINTER, "Receipt Printer 12").is_err());
        assert!(s.get(KEY_SELECTED_PRINTER).is_none());

        let err = s.update(|map| {
            map.insert(KEY_SELECTED_PRINTER.into(), "Receipt Printer 12".into());
            map.insert(KEY_PRINTER_IP.into(), "10.10.10.12".into());
        });
        assert!(err.is_err());
        assert!(s.get(KEY_SELECTED_PRINTER).is_none());
        assert!(s.get(KEY_PRINTER_IP).is_none());
    }

    #[test]
    fn test_update_commits_keys_together() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let s = Settings::open(&path).unwrap();
        s.update(|map| {
            map.insert(KEY_SELECTED_PRINTER.into(), "Receipt Printer 12".into());
            map.insert(KEY_PRINTER_IP.into(), "10.10.10.12".into());
        })
        .unwrap();

        let reopened = Settings::open(&path).unwrap();
        assert_eq!(reopened.get_str(KEY_PRINTER_IP).as_deref(), Some("10.10.10.12"));
        assert_eq!(
            reopened.get_str(KEY_SELECTED_PRINTER).as_deref(),
            Some("Receipt Printer 12")
        );
    }

    #[test]
    fn test_startup_views_are_distinct() {
        let mut paths: Vec<_> = StartupView::ALL.iter().map(|v| v.path()).collect();
        paths.dedup();
        assert_eq!(paths.len(), 6);
        assert_eq!(StartupView::KitchenPos.label(), "Kitchen POS");
    }
}
