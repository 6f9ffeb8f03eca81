//! Durable per-user session ledger.
//!
//! A [`Ledger`] is bound to one user identity. Sessions are opened and closed
//! in strict alternation; every close appends a [`SessionRecord`], updates the
//! user's totals and rewrites the store file. The report is generated
//! automatically the first time the user's total crosses the target.
//!
//! Sessions are closed on every exit path that runs destructors: the
//! [`SessionGuard`] returned by [`Ledger::session`] ends its session on drop,
//! and the `Ledger` itself ends a still-open session when dropped. Only a
//! process death that skips destructors loses the open session.

pub mod clock;
pub mod record;
pub mod report;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use record::{SessionRecord, UserStatus, UserTimeData};
pub use store::{DATA_FILE_NAME, LedgerStore};

use crate::formatter::status_line;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

pub const REPORTS_DIR: &str = "reports";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("A session for '{workflow}' is already open")]
    SessionAlreadyOpen { workflow: String },
    #[error("No session is open")]
    SessionNotOpen,
    #[error("Ledger store {path} is unreadable: {reason}")]
    StoreCorrupted { path: PathBuf, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
struct OpenSession {
    workflow: String,
    start: DateTime<Utc>,
}

/// Trimmed, lower-cased form used as the store key.
pub fn normalize_user_id(user_id: &str) -> String {
    user_id.trim().to_lowercase()
}

/// Status rows for every user in `data_dir`, most hours first.
pub fn list_users(data_dir: &Path) -> Vec<UserStatus> {
    LedgerStore::in_dir(data_dir).list_users()
}

pub struct Ledger {
    store: LedgerStore,
    reports_dir: PathBuf,
    data: UserTimeData,
    clock: Arc<dyn Clock>,
    open: Option<OpenSession>,
}

impl Ledger {
    pub fn open(data_dir: &Path, user_id: &str, target_seconds: f64) -> Result<Self, LedgerError> {
        Self::open_with_clock(data_dir, user_id, target_seconds, Arc::new(SystemClock))
    }

    /// Load (or create in memory) the aggregate for `user_id`.
    ///
    /// An unreadable store is not fatal: the user starts from zero and the
    /// unreadable file is preserved on the next save.
    pub fn open_with_clock(
        data_dir: &Path,
        user_id: &str,
        target_seconds: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        std::fs::create_dir_all(data_dir)?;
        let store = LedgerStore::in_dir(data_dir);
        let user_id = normalize_user_id(user_id);
        let now = clock.now();

        let data = match store.load_user(&user_id) {
            Ok(Some(mut data)) => {
                if data.target_seconds != target_seconds {
                    info!(
                        "Target for {} changed from {:.0}s to {:.0}s",
                        user_id, data.target_seconds, target_seconds
                    );
                    data.target_seconds = target_seconds;
                }
                data
            }
            Ok(None) => {
                info!("New ledger entry for {}", user_id);
                UserTimeData::new(&user_id, target_seconds, now)
            }
            Err(e) => {
                warn!("{}; starting {} from an empty record", e, user_id);
                UserTimeData::new(&user_id, target_seconds, now)
            }
        };

        let mut ledger = Self {
            store,
            reports_dir: data_dir.join(REPORTS_DIR),
            data,
            clock,
            open: None,
        };
        // A lowered target may already be met by recorded time.
        if ledger.data.reconcile(now) {
            info!("Target for {} already reached", ledger.data.user_id);
            ledger.store.save_user(&ledger.data, now)?;
            match ledger.generate_report() {
                Ok(path) => info!("Report written to {}", path.display()),
                Err(e) => warn!("Failed to write completion report: {}", e),
            }
        }
        Ok(ledger)
    }

    pub fn user_id(&self) -> &str {
        &self.data.user_id
    }

    pub fn data(&self) -> &UserTimeData {
        &self.data
    }

    pub fn status(&self) -> UserStatus {
        UserStatus::from(&self.data)
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    pub fn is_complete(&self) -> bool {
        self.data.is_complete()
    }

    pub fn is_session_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn start_session(&mut self, workflow: &str) -> Result<(), LedgerError> {
        if let Some(open) = &self.open {
            return Err(LedgerError::SessionAlreadyOpen {
                workflow: open.workflow.clone(),
            });
        }

        self.open = Some(OpenSession {
            workflow: workflow.to_string(),
            start: self.clock.now(),
        });
        info!("Session started for {}: {}", self.data.user_id, status_line(&self.data));
        Ok(())
    }

    /// Close the open session, persist it, and report on first completion.
    pub fn end_session(&mut self) -> Result<SessionRecord, LedgerError> {
        let open = self.open.take().ok_or(LedgerError::SessionNotOpen)?;
        let end = self.clock.now();
        let duration_seconds = (end - open.start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let record = SessionRecord {
            start_time: open.start,
            end_time: end,
            duration_seconds,
            workflow: open.workflow,
        };
        let crossed = self.data.record(record.clone());
        let saved = self.store.save_user(&self.data, end);

        info!(
            "Session ended for {} after {:.0}s: {}",
            self.data.user_id,
            duration_seconds,
            status_line(&self.data)
        );

        if crossed {
            info!("Target reached for {}", self.data.user_id);
            match self.generate_report() {
                Ok(path) => info!("Report written to {}", path.display()),
                Err(e) => warn!("Failed to write completion report: {}", e),
            }
        }

        saved?;
        Ok(record)
    }

    pub fn generate_report(&self) -> Result<PathBuf, LedgerError> {
        Ok(report::write_report(
            &self.reports_dir,
            &self.data,
            self.clock.now(),
        )?)
    }

    /// Open a session that closes itself when the guard goes out of scope.
    pub fn session(&mut self, workflow: &str) -> Result<SessionGuard<'_>, LedgerError> {
        self.start_session(workflow)?;
        Ok(SessionGuard {
            ledger: self,
            finished: false,
        })
    }

    fn end_on_exit(&mut self, origin: &str) {
        if self.open.is_none() {
            return;
        }
        match self.end_session() {
            Ok(record) => warn!(
                "Session closed by {} after {:.0}s",
                origin, record.duration_seconds
            ),
            Err(e) => error!("Failed to close session on {}: {}", origin, e),
        }
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        self.end_on_exit("ledger drop");
    }
}

/// Scoped ledger session. Ends the session exactly once.
pub struct SessionGuard<'a> {
    ledger: &'a mut Ledger,
    finished: bool,
}

impl SessionGuard<'_> {
    pub fn ledger(&self) -> &Ledger {
        self.ledger
    }

    /// End the session explicitly and get its record.
    pub fn finish(mut self) -> Result<SessionRecord, LedgerError> {
        self.finished = true;
        self.ledger.end_session()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.ledger.end_on_exit("scope exit");
        }
    }
}
