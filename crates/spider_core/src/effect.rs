use serde::{Deserialize, Serialize};

use crate::{LaunchId, TaskId};

/// Side effects requested by [`crate::update`]; executed by the scheduler runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a launcher that waits for a slot and then runs the mission.
    SpawnLauncher { id: TaskId, launch: LaunchId },
    /// Cancel the launcher (and any mission it runs) for this launch.
    CancelLauncher { id: TaskId, launch: LaunchId },
    RegisterDownloads(TaskId),
    DeregisterDownloads(TaskId),
    DeregisterAllDownloads,
    /// Replace the concurrency semaphore with a fresh one at full capacity.
    ResetSlots,
    /// Pause flags changed; republish them to launchers and missions.
    PublishPauses,
    Log { severity: Severity, message: String },
    StatusChanged,
    /// All bytes for this task are on disk.
    TaskFinished(TaskId),
    /// Non-finished task ids, in admission order.
    PersistTasks(Vec<TaskId>),
}

impl Effect {
    pub(crate) fn log(severity: Severity, message: impl Into<String>) -> Self {
        Effect::Log {
            severity,
            message: message.into(),
        }
    }
}

/// Severity tag carried by user-facing log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Danger,
    Secondary,
}
