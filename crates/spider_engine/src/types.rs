use std::fmt;
use std::path::PathBuf;

use spider_core::{EngineState, Severity, StatusEntry, TaskId};
use thiserror::Error;

/// Events published by the engine thread; drained with `EngineHandle::try_recv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Log { severity: Severity, message: String },
    /// Fresh status list after any tracking change.
    Status(Vec<StatusEntry>),
    /// Successful download count for a task in this session.
    Progress { task: TaskId, succeeded: u64 },
    TaskFinished(TaskId),
    State(EngineState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One file transfer owned by a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub source_url: String,
    pub destination: PathBuf,
    pub owner: TaskId,
    pub label: String,
    pub kind: MediaKind,
    /// Query-stripped url; the history identifier derives from it.
    pub clean_url: String,
    pub origin_link: Option<String>,
    pub retry_attempt: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    Network,
    Io,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::Io => write!(f, "io error"),
        }
    }
}
