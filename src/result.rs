use std::{path::PathBuf, time::Duration};

use miette::Diagnostic;
use thiserror::Error;

/// Number of stderr lines kept when reporting a tool failure
const DIAGNOSTIC_LINES: usize = 20;

/// Failure of an external program invocation
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("Could not run {program} command")]
    #[diagnostic(help("Make sure {program} is installed and reachable from the PATH"))]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} did run but was not successful (status: {status})")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Could not read the output of {program}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// The diagnostic text printed by the tool, if any
    pub fn details(&self) -> Option<String> {
        match self {
            ToolError::Failed { stderr, .. } => Some(tail_lines(stderr, DIAGNOSTIC_LINES)),
            ToolError::Spawn { source, .. } | ToolError::Io { source, .. } => {
                Some(source.to_string())
            }
            ToolError::Timeout { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error("Metadata process failed")]
    Process(#[source] ToolError),

    #[error("Video is unavailable")]
    Unavailable { stderr: String },

    #[error("Metadata process produced no output")]
    NoOutput,

    #[error("Metadata output is not valid JSON metadata")]
    Unparsable(#[source] serde_json::Error),
}

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("Stream retrieval failed")]
    Process(#[source] ToolError),

    #[error("Stream retrieval produced no file at {}", path.display())]
    MissingOutput { path: PathBuf },
}

#[derive(Debug, Error, Diagnostic)]
pub enum AssembleError {
    #[error("Muxing video and audio failed")]
    Process(#[source] ToolError),

    #[error("Muxing produced no file at {}", path.display())]
    MissingOutput { path: PathBuf },
}

#[derive(Debug, Error, Diagnostic)]
pub enum DeliveryError {
    #[error("Finished file {} is missing", path.display())]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Client disconnected before the stream completed")]
    Disconnected,
}

/// Any failure of the download-and-assemble pipeline
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    /// The underlying tool diagnostic or cause, if any
    pub fn details(&self) -> Option<String> {
        match self {
            PipelineError::Resolve(ResolveError::Process(err))
            | PipelineError::Fetch(FetchError::Process(err))
            | PipelineError::Assemble(AssembleError::Process(err)) => err.details(),
            PipelineError::Resolve(ResolveError::Unavailable { stderr }) => {
                Some(tail_lines(stderr, DIAGNOSTIC_LINES))
            }
            PipelineError::Resolve(ResolveError::Unparsable(err)) => Some(err.to_string()),
            PipelineError::Delivery(DeliveryError::MissingFile { source, .. }) => {
                Some(source.to_string())
            }
            _ => None,
        }
    }

    /// Whether the failure comes from a stage running out of time
    pub fn is_timeout(&self) -> bool {
        match self {
            PipelineError::Resolve(ResolveError::Process(err))
            | PipelineError::Fetch(FetchError::Process(err))
            | PipelineError::Assemble(AssembleError::Process(err)) => err.is_timeout(),
            _ => false,
        }
    }
}

/// Keep only the last `n` non-empty lines of a tool output
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
