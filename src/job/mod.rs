mod progress;
mod temp;

use std::{fmt::Display, path::Path};

use tracing::{debug, warn};

use crate::io::random_token;

pub use progress::{ProgressHandle, ProgressRegistry};
use temp::TempFiles;

/// Lifecycle of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Resolving,
    Fetching,
    /// Only when video and audio were fetched separately
    Assembling,
    Streaming,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// Whether the state machine allows going from `self` to `next`
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;

        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Resolving)
            | (Resolving, Fetching)
            | (Fetching, Assembling)
            | (Fetching, Streaming)
            | (Assembling, Streaming)
            | (Streaming, Done) => true,
            _ => false,
        }
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Pending => "PENDING",
            JobState::Resolving => "RESOLVING",
            JobState::Fetching => "FETCHING",
            JobState::Assembling => "ASSEMBLING",
            JobState::Streaming => "STREAMING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A single download request, from acceptance to the last streamed byte.
///
/// The job owns its temporary files: whatever way the job ends, dropping it
/// deletes them. A job dropped before reaching [`JobState::Done`] is failed.
#[derive(Debug)]
pub struct DownloadJob {
    token: String,
    url: String,
    format_id: Option<String>,
    state: JobState,
    progress: Option<ProgressHandle>,
    files: TempFiles,
}

impl DownloadJob {
    pub fn new(temp_dir: &Path, url: impl Into<String>, format_id: Option<String>) -> Self {
        let token = random_token();
        let files = TempFiles::new(temp_dir, &token);

        Self {
            token,
            url: url.into(),
            format_id,
            state: JobState::Pending,
            progress: None,
            files,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requested format, `None` meaning the best combined stream
    pub fn format_id(&self) -> Option<&str> {
        self.format_id.as_deref()
    }

    #[cfg(test)]
    pub fn state(&self) -> JobState {
        self.state
    }

    #[cfg(test)]
    pub fn files(&self) -> &TempFiles {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut TempFiles {
        &mut self.files
    }

    pub fn progress(&self) -> Option<&ProgressHandle> {
        self.progress.as_ref()
    }

    pub fn attach_progress(&mut self, handle: ProgressHandle) {
        self.progress = Some(handle);
    }

    /// Move to the next state. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: JobState) {
        if self.state.can_advance_to(next) {
            debug!("Job {}: {} -> {}", self.token, self.state, next);
            self.state = next;
        } else {
            warn!(
                "Job {}: ignoring invalid transition {} -> {}",
                self.token, self.state, next
            );
        }
    }

    /// Move to [`JobState::Failed`] unless the job already ended
    pub fn fail(&mut self, reason: &dyn Display) {
        if !self.state.is_terminal() {
            warn!("Job {} failed while {}: {reason}", self.token, self.state);
            self.state = JobState::Failed;
        }
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        self.fail(&"request ended before completion");
        debug!(
            "Job {} released, deleting {} temporary file(s)",
            self.token,
            self.files.reserved().len()
        );
    }
}
