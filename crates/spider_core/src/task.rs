use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

/// Sentinel id for the signed-in account's likes feed.
pub const LIKES_TASK_ID: &str = "MY_LIKES";
/// Sentinel id for the signed-in account's bookmarks feed.
pub const BOOKMARKS_TASK_ID: &str = "MY_BOOKMARKS";

const LIKES_DIR: &str = "My Likes";
const BOOKMARKS_DIR: &str = "My Bookmarks";
const PROFILES_DIR: &str = "Users";

/// Tokens that show up when users paste site URLs and are never real handles.
const IGNORED_TOKENS: &[&str] = &["x", "com", "https", "http", "twitter", "www"];

/// Unique key of a crawl target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn likes() -> Self {
        Self::new(LIKES_TASK_ID)
    }

    pub fn bookmarks() -> Self {
        Self::new(BOOKMARKS_TASK_ID)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> TaskKind {
        match self.0.as_str() {
            LIKES_TASK_ID => TaskKind::Likes,
            BOOKMARKS_TASK_ID => TaskKind::Bookmarks,
            handle => TaskKind::Profile(handle.to_string()),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Directory holding one subfolder per crawled profile.
pub fn profiles_dir(save_root: &Path) -> PathBuf {
    save_root.join(PROFILES_DIR)
}

/// What a task crawls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// A user's media feed, keyed by handle.
    Profile(String),
    Likes,
    Bookmarks,
}

impl TaskKind {
    /// Display label used in log lines.
    pub fn label(&self) -> String {
        match self {
            TaskKind::Profile(handle) => handle.clone(),
            TaskKind::Likes => "Likes".to_string(),
            TaskKind::Bookmarks => "Bookmarks".to_string(),
        }
    }

    /// Per-task destination directory under the save root.
    pub fn destination_dir(&self, save_root: &Path) -> PathBuf {
        match self {
            TaskKind::Profile(handle) => profiles_dir(save_root).join(handle),
            TaskKind::Likes => save_root.join(LIKES_DIR),
            TaskKind::Bookmarks => save_root.join(BOOKMARKS_DIR),
        }
    }
}

/// Parses free-form user input into task ids.
///
/// Accepts handles (`@name` or `name`) and profile URLs separated by
/// whitespace or commas. Output keeps first-seen order without duplicates.
pub fn parse_task_ids(raw: &str) -> Vec<TaskId> {
    let mut ids: Vec<TaskId> = Vec::new();
    for token in raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        let Some(handle) = handle_from_token(token) else {
            continue;
        };
        let id = TaskId::new(handle);
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn handle_from_token(token: &str) -> Option<String> {
    let candidate = if token.contains('/') {
        let parsed = Url::parse(token)
            .or_else(|_| Url::parse(&format!("https://{token}")))
            .ok()?;
        parsed
            .path_segments()?
            .find(|segment| !segment.is_empty())?
            .to_string()
    } else {
        token.trim_start_matches('@').to_string()
    };

    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return None;
    }
    if IGNORED_TOKENS
        .iter()
        .any(|ignored| ignored.eq_ignore_ascii_case(&candidate))
    {
        return None;
    }
    Some(candidate)
}
