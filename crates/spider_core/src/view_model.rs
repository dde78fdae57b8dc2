use serde::{Deserialize, Serialize};

use crate::{EngineState, Phase, SchedulerState, TaskId};

/// Status shown to the frontend for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued while the engine is not running.
    Pending,
    Queued,
    Running,
    Paused,
    Error,
    /// Feed exhausted; downloads still draining.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub id: TaskId,
    pub status: TaskStatus,
    pub progress: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SchedulerState {
    /// Merged status list: running, queued, waiting for a slot, failed.
    ///
    /// `progress` supplies the download success count for a task.
    pub fn snapshot(&self, progress: impl Fn(&TaskId) -> u64) -> Vec<StatusEntry> {
        let mut running = Vec::new();
        let mut queued = Vec::new();
        let mut waiting = Vec::new();

        for (id, tracked) in &self.tasks {
            match tracked.phase {
                Phase::Running { .. } | Phase::Suspended { .. } | Phase::Draining { .. } => {
                    running.push((tracked.seq, id, tracked.phase))
                }
                Phase::Queued => queued.push((tracked.admitted, id, tracked.phase)),
                Phase::Transitioning { .. } => waiting.push((tracked.seq, id, tracked.phase)),
            }
        }
        running.sort_by_key(|(order, _, _)| *order);
        queued.sort_by_key(|(order, _, _)| *order);
        waiting.sort_by_key(|(order, _, _)| *order);

        let mut entries = Vec::with_capacity(self.tasks.len() + self.failed.len());
        for (_, id, phase) in running {
            let status = match phase {
                Phase::Draining { .. } => TaskStatus::Finished,
                Phase::Suspended { .. } => TaskStatus::Paused,
                _ if self.is_paused(id) => TaskStatus::Paused,
                _ => TaskStatus::Running,
            };
            entries.push(StatusEntry {
                id: id.clone(),
                status,
                progress: progress(id),
                error: None,
            });
        }

        let queued_status = if self.engine == EngineState::Idle {
            TaskStatus::Pending
        } else {
            TaskStatus::Queued
        };
        for (_, id, _) in queued {
            entries.push(StatusEntry {
                id: id.clone(),
                status: queued_status,
                progress: 0,
                error: None,
            });
        }

        for (_, id, _) in waiting {
            let status = if self.is_paused(id) {
                TaskStatus::Paused
            } else {
                TaskStatus::Queued
            };
            entries.push(StatusEntry {
                id: id.clone(),
                status,
                progress: 0,
                error: None,
            });
        }

        let mut failed: Vec<_> = self.failed.iter().collect();
        failed.sort_by_key(|(_, failure)| failure.seq);
        for (id, failure) in failed {
            entries.push(StatusEntry {
                id: id.clone(),
                status: TaskStatus::Error,
                progress: progress(id),
                error: Some(failure.message.clone()),
            });
        }

        entries
    }
}
