use std::fs;
use std::path::{Path, PathBuf};

use engine_logging::{engine_error, engine_info, engine_warn};
use serde::{Deserialize, Serialize};
use spider_core::TaskId;

use crate::persist::AtomicFileWriter;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedTasks {
    tasks: Vec<TaskId>,
}

/// Unfinished task ids, kept across restarts in a RON file.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored ids in their saved order. A missing or unreadable file yields none.
    pub fn load(&self) -> Vec<TaskId> {
        let content = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                engine_warn!("Failed to read saved tasks from {:?}: {}", self.path, err);
                return Vec::new();
            }
        };

        let saved: PersistedTasks = match ron::from_str(&content) {
            Ok(saved) => saved,
            Err(err) => {
                engine_warn!("Failed to parse saved tasks from {:?}: {}", self.path, err);
                return Vec::new();
            }
        };

        engine_info!("Loaded {} saved tasks from {:?}", saved.tasks.len(), self.path);
        saved.tasks
    }

    pub fn save(&self, tasks: &[TaskId]) {
        let Some(filename) = self.path.file_name().and_then(|name| name.to_str()) else {
            engine_error!("Task file path {:?} has no file name", self.path);
            return;
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let saved = PersistedTasks {
            tasks: tasks.to_vec(),
        };
        let content = match ron::ser::to_string_pretty(&saved, ron::ser::PrettyConfig::new()) {
            Ok(text) => text,
            Err(err) => {
                engine_error!("Failed to serialize saved tasks: {}", err);
                return;
            }
        };

        if let Err(err) = AtomicFileWriter::new(dir).write(filename, &content) {
            engine_error!("Failed to write saved tasks to {:?}: {}", self.path, err);
        }
    }
}
