//! JSONL history loader for Claude Code transcript files.
//!
//! Claude stores transcripts in `{root}/{escaped-path}/{session-id}.jsonl`
//! where `root` is usually `~/.claude/projects` and the project path is
//! escaped by replacing every non-alphanumeric character with `-`:
//!
//! `/home/user/code/my.project` -> `-home-user-code-my-project`

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_core::HistoryRecord;
use relay_protocol::parse_history;
use tracing::{debug, warn};

use crate::collab::{HistoryError, HistoryLoader};

/// Reads history straight from the agent's transcript files.
#[derive(Debug, Clone)]
pub struct JsonlHistoryLoader {
    root: PathBuf,
}

impl JsonlHistoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a project's transcripts.
    pub fn project_dir(&self, project_path: &str) -> PathBuf {
        self.root.join(escape_project_path(project_path))
    }

    /// Locates the transcript file for a session.
    ///
    /// With a project path the location is computed directly. Without one
    /// every project directory is searched; the first match wins.
    async fn locate(
        &self,
        external_session_id: &str,
        project_path: Option<&str>,
    ) -> Result<Option<PathBuf>, HistoryError> {
        let file_name = format!("{external_session_id}.jsonl");

        if let Some(project_path) = project_path {
            let path = self.project_dir(project_path).join(file_name);
            return Ok(tokio::fs::try_exists(&path)
                .await
                .map_err(|e| HistoryError::io(path.display(), e))?
                .then_some(path));
        }

        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HistoryError::io(self.root.display(), e)),
        };

        while let Some(dir) = dirs
            .next_entry()
            .await
            .map_err(|e| HistoryError::io(self.root.display(), e))?
        {
            let candidate = dir.path().join(&file_name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Ok(Some(candidate));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl HistoryLoader for JsonlHistoryLoader {
    async fn load_history(
        &self,
        external_session_id: Option<&str>,
        project_path: Option<&str>,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let Some(external_session_id) = external_session_id else {
            debug!("No external session id, history is empty");
            return Ok(Vec::new());
        };

        if !is_safe_file_stem(external_session_id) {
            warn!(
                external_session_id = external_session_id,
                "Refusing external session id that escapes the history root"
            );
            return Err(HistoryError::InvalidSessionId(
                external_session_id.to_string(),
            ));
        }

        let Some(path) = self.locate(external_session_id, project_path).await? else {
            debug!(
                external_session_id = external_session_id,
                project_path = ?project_path,
                "Transcript file not found, history is empty"
            );
            return Ok(Vec::new());
        };

        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryError::io(path.display(), e)),
        };

        parse_history(&body).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Corrupt transcript file");
            HistoryError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// A session id must stay a single file name inside its project directory.
fn is_safe_file_stem(id: &str) -> bool {
    !id.is_empty() && id != "." && !id.contains("..") && !id.contains(['/', '\\', '\0'])
}

/// Escapes a project path the way Claude names its project directories.
pub fn escape_project_path(project_path: &str) -> String {
    project_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
