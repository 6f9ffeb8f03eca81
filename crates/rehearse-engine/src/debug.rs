use crate::backend::{Backend, BackendError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const INDEX_FILE: &str = ".dump_index";

/// Numbered screenshot dumps: `<dir>/<n>.<tag>.png`.
///
/// The counter lives in `<dir>/.dump_index` so numbering continues across
/// runs and across clones of the recorder.
#[derive(Debug, Clone)]
pub struct DebugRecorder {
    dir: PathBuf,
    enabled: bool,
}

impl DebugRecorder {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new("debug", false)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a screenshot. Failures are logged and swallowed.
    pub async fn dump(&self, backend: &mut dyn Backend, tag: &str) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        match self.try_dump(backend, tag).await {
            Ok(path) => {
                info!("Debug dump saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Debug dump '{}' failed: {}", tag, e);
                None
            }
        }
    }

    async fn try_dump(&self, backend: &mut dyn Backend, tag: &str) -> Result<PathBuf, BackendError> {
        let bytes = backend.screenshot().await?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let index = self.next_index().await?;
        let path = self.dir.join(format!("{}.{}.png", index, sanitize_tag(tag)));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    async fn next_index(&self) -> std::io::Result<u64> {
        let index_path = self.dir.join(INDEX_FILE);
        let current = match tokio::fs::read_to_string(&index_path).await {
            Ok(content) => content.trim().parse::<u64>().unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        let next = current + 1;
        tokio::fs::write(&index_path, next.to_string()).await?;
        Ok(next)
    }
}

fn sanitize_tag(tag: &str) -> String {
    let cleaned: String = tag
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "dump".to_string()
    } else {
        cleaned
    }
}
