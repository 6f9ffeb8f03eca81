use super::record::UserTimeData;
use crate::formatter::format_hms;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const RULE: &str = "============================================================";
const THIN_RULE: &str = "------------------------------------------------------------";

/// `report_<safe-user>_<YYYYMMDD_HHMMSS>.txt`
pub fn report_file_name(user_id: &str, generated_at: DateTime<Utc>) -> String {
    format!(
        "report_{}_{}.txt",
        safe_user(user_id),
        generated_at.format("%Y%m%d_%H%M%S")
    )
}

fn safe_user(user_id: &str) -> String {
    user_id.replace('@', "_at_").replace('.', "_")
}

pub fn render_report(data: &UserTimeData, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let state = if data.completed {
        "COMPLETED"
    } else {
        "IN PROGRESS"
    };

    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "PRACTICE TIME REPORT");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "User:            {}", data.user_id);
    let _ = writeln!(
        out,
        "Generated:       {}",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Target hours:    {:.2}", data.target_hours());
    let _ = writeln!(
        out,
        "Actual hours:    {:.2} ({})",
        data.total_hours(),
        format_hms(data.total_seconds)
    );
    let _ = writeln!(out, "Progress:        {:.1}%", data.progress_percent());
    let _ = writeln!(out, "Remaining hours: {:.2}", data.remaining_hours());
    let _ = writeln!(out, "State:           {}", state);
    let _ = writeln!(out, "Sessions:        {}", data.sessions.len());

    if let (Some(first), Some(last)) = (data.sessions.first(), data.sessions.last()) {
        let _ = writeln!(out, "First session:   {}", first.start_time.format("%Y-%m-%d"));
        let _ = writeln!(out, "Last session:    {}", last.end_time.format("%Y-%m-%d"));
    }
    if let Some(completed_at) = data.completed_at {
        let _ = writeln!(
            out,
            "Completed on:    {}",
            completed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "SESSIONS");
    let _ = writeln!(out, "{}", THIN_RULE);
    let _ = writeln!(out, "{:>4}  {:<20}  {:>9}  {}", "#", "Start", "Duration", "Workflow");

    let mut sessions: Vec<_> = data.sessions.iter().collect();
    sessions.sort_by_key(|s| s.start_time);
    for (i, session) in sessions.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4}  {:<20}  {:>9}  {}",
            i + 1,
            session.start_time.format("%Y-%m-%d %H:%M:%S"),
            format_hms(session.duration_seconds),
            session.workflow
        );
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

/// Render and write a report into `dir`, creating it if needed.
pub fn write_report(
    dir: &Path,
    data: &UserTimeData,
    generated_at: DateTime<Utc>,
) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(report_file_name(&data.user_id, generated_at));
    fs::write(&path, render_report(data, generated_at))?;
    Ok(path)
}
