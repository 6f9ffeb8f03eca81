use super::LedgerError;
use super::record::{UserStatus, UserTimeData};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DATA_FILE_NAME: &str = "time_tracking.json";

/// Single-file JSON store mapping user id to [`UserTimeData`].
///
/// Every save re-reads the whole file, merges one user in and rewrites the
/// whole file. Two writers on the same file are not safe.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store file inside a data directory.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(DATA_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every user. A missing file is an empty store.
    pub fn load_all(&self) -> Result<BTreeMap<String, UserTimeData>, LedgerError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| LedgerError::StoreCorrupted {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| LedgerError::StoreCorrupted {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    pub fn load_user(&self, user_id: &str) -> Result<Option<UserTimeData>, LedgerError> {
        Ok(self.load_all()?.remove(user_id))
    }

    /// Read-merge-write one user's aggregate.
    ///
    /// An unreadable file is moved aside to `<file>.corrupt-<timestamp>` before
    /// the fresh store is written, so its bytes are never lost.
    pub fn save_user(&self, data: &UserTimeData, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let mut all = match self.load_all() {
            Ok(all) => all,
            Err(LedgerError::StoreCorrupted { reason, .. }) => {
                let backup = self.preserve_unreadable(now)?;
                warn!(
                    "Ledger store {} was unreadable ({}); preserved as {}",
                    self.path.display(),
                    reason,
                    backup.display()
                );
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        all.insert(data.user_id.clone(), data.clone());
        self.write_all(&all)
    }

    /// Status rows for every user, most hours first. Unreadable stores list nobody.
    pub fn list_users(&self) -> Vec<UserStatus> {
        let all = match self.load_all() {
            Ok(all) => all,
            Err(e) => {
                warn!("{}", e);
                return Vec::new();
            }
        };

        let mut users: Vec<UserStatus> = all.values().map(UserStatus::from).collect();
        users.sort_by(|a, b| {
            b.total_hours
                .partial_cmp(&a.total_hours)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        users
    }

    fn write_all(&self, all: &BTreeMap<String, UserTimeData>) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(all)?;

        // Write to temp file, then rename over the store
        let temp_file = self.path.with_extension("json.tmp");
        fs::write(&temp_file, json)?;
        fs::rename(&temp_file, &self.path)?;
        Ok(())
    }

    fn preserve_unreadable(&self, now: DateTime<Utc>) -> Result<PathBuf, LedgerError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DATA_FILE_NAME.to_string());
        let backup = self.path.with_file_name(format!(
            "{}.corrupt-{}",
            file_name,
            now.format("%Y%m%dT%H%M%S")
        ));
        fs::rename(&self.path, &backup)?;
        Ok(backup)
    }
}
