use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// One finished session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub workflow: String,
}

/// Cumulative progress for one user identity.
///
/// `total_seconds` is always the sum of every session's duration, and
/// `completed` never goes back to `false` once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTimeData {
    pub user_id: String,
    pub total_seconds: f64,
    pub target_seconds: f64,
    pub sessions: Vec<SessionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl UserTimeData {
    pub fn new(user_id: impl Into<String>, target_seconds: f64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            total_seconds: 0.0,
            target_seconds,
            sessions: Vec::new(),
            created_at: now,
            updated_at: now,
            completed: false,
            completed_at: None,
        }
    }

    /// Append a session and return whether this crossed the target for the first time.
    pub(crate) fn record(&mut self, record: SessionRecord) -> bool {
        self.total_seconds += record.duration_seconds;
        self.updated_at = record.end_time;
        let end_time = record.end_time;
        self.sessions.push(record);

        self.reconcile(end_time)
    }

    /// Set the completion flag if the total has reached the target. True when
    /// this flipped it.
    pub(crate) fn reconcile(&mut self, now: DateTime<Utc>) -> bool {
        if self.completed || self.total_seconds < self.target_seconds {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(now);
        true
    }

    pub fn total_hours(&self) -> f64 {
        self.total_seconds / SECONDS_PER_HOUR
    }

    pub fn target_hours(&self) -> f64 {
        self.target_seconds / SECONDS_PER_HOUR
    }

    pub fn remaining_hours(&self) -> f64 {
        (self.target_hours() - self.total_hours()).max(0.0)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.target_seconds <= 0.0 {
            return 100.0;
        }
        (self.total_seconds / self.target_seconds * 100.0).min(100.0)
    }

    /// The stored flag; see [`reconcile`](Self::reconcile).
    pub fn is_complete(&self) -> bool {
        self.completed
    }
}

/// Row of the status listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStatus {
    pub user_id: String,
    pub total_hours: f64,
    pub target_hours: f64,
    pub progress_percent: f64,
    pub sessions: usize,
    pub completed: bool,
}

impl From<&UserTimeData> for UserStatus {
    fn from(data: &UserTimeData) -> Self {
        Self {
            user_id: data.user_id.clone(),
            total_hours: data.total_hours(),
            target_hours: data.target_hours(),
            progress_percent: data.progress_percent(),
            sessions: data.sessions.len(),
            completed: data.completed,
        }
    }
}
