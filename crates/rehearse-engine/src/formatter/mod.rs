use crate::ledger::record::{UserStatus, UserTimeData};
use std::fmt::Write as _;

const SENSITIVE_KEYS: [&str; 8] = [
    "password",
    "passwd",
    "secret",
    "token",
    "cvv",
    "ssn",
    "card_number",
    "credit_card",
];

/// Seconds as `HH:MM:SS`. Hours are not wrapped at 24; negatives clamp to zero.
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Quote `value` for a log line, or mask it when the field it goes into looks
/// like a credential.
pub fn mask_sensitive(value: &str, field: &str, extra_keys: &[&str]) -> String {
    let field = field.to_lowercase();
    let sensitive = SENSITIVE_KEYS
        .iter()
        .chain(extra_keys.iter())
        .any(|key| field.contains(&key.to_lowercase()));

    if sensitive {
        "\"********\"".to_string()
    } else {
        format!("{:?}", value)
    }
}

/// `[STATE] HH:MM:SS / Nh (p%) - k sessions`
pub fn status_line(data: &UserTimeData) -> String {
    let state = if data.is_complete() {
        "COMPLETED"
    } else {
        "IN PROGRESS"
    };
    format!(
        "[{}] {} / {:.0}h ({:.1}%) - {} sessions",
        state,
        format_hms(data.total_seconds),
        data.target_hours(),
        data.progress_percent(),
        data.sessions.len()
    )
}

/// Table printed by `rehearse status`.
pub fn format_status_table(users: &[UserStatus]) -> String {
    if users.is_empty() {
        return "No users recorded yet.".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36} {:>9} {:>9} {:>9}  {}",
        "User", "Hours", "Progress", "Sessions", "State"
    );
    let _ = writeln!(out, "{}", "-".repeat(80));

    for user in users {
        let state = if user.completed { "COMPLETED" } else { "in progress" };
        let _ = writeln!(
            out,
            "{:<36} {:>9.2} {:>8.1}% {:>9}  {}",
            user.user_id, user.total_hours, user.progress_percent, user.sessions, state
        );
    }

    let total_hours: f64 = users.iter().map(|u| u.total_hours).sum();
    let completed = users.iter().filter(|u| u.completed).count();
    let _ = writeln!(out, "{}", "-".repeat(80));
    let _ = writeln!(
        out,
        "Total: {} users, {:.2} hours, {} completed",
        users.len(),
        total_hours,
        completed
    );

    let pending: Vec<&UserStatus> = users.iter().filter(|u| !u.completed).collect();
    if !pending.is_empty() {
        let _ = writeln!(out, "\nRemaining:");
        for user in pending {
            let remaining = (user.target_hours - user.total_hours).max(0.0);
            let _ = writeln!(out, "  {:<34} {:>9.2}h", user.user_id, remaining);
        }
    }

    out
}
