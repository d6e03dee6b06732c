//! Optional append-only log of every prompt sent to the backend.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

const RULE_WIDTH: usize = 72;

/// Appends labelled, timestamped prompt entries to a file.
#[derive(Debug, Clone)]
pub struct PromptLog {
    path: PathBuf,
}

impl PromptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render one log entry.
    fn entry(label: &str, content: &str) -> String {
        let rule = "─".repeat(RULE_WIDTH);
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        format!("\n{rule}\n[{now}] {label}\n{rule}\n{content}\n")
    }

    /// Append an entry. Failures are logged, never returned.
    pub async fn append(&self, label: &str, content: &str) {
        let entry = Self::entry(label, content);
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(entry.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write prompt log");
        }
    }
}
