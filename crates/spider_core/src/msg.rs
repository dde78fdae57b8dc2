use crate::{LaunchId, MissionOutcome, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Caller asked to crawl a task.
    Enqueue(TaskId),
    /// Caller asked to drop a task wherever it currently lives.
    Delete(TaskId),
    Pause(TaskId),
    /// Unpause a task, or re-queue it if it failed.
    Resume(TaskId),
    PauseAll,
    ResumeAll,
    ClearAll,
    /// Browser context launch began.
    EngineStarting,
    /// Browser context is warm; queued tasks may be dispatched.
    EngineReady,
    /// Engine stopped. `reason` is set when the browser context was lost.
    EngineStopped { reason: Option<String> },
    /// Launcher acquired a slot and is about to run the mission.
    MissionStarted { id: TaskId, launch: LaunchId },
    /// Mission released its slot at a pause checkpoint.
    MissionSuspended { id: TaskId, launch: LaunchId },
    /// Mission reacquired a slot after a pause.
    MissionResumed { id: TaskId, launch: LaunchId },
    MissionEnded {
        id: TaskId,
        launch: LaunchId,
        outcome: MissionOutcome,
    },
    /// Pending download count for a finished mission reached zero.
    DownloadsDrained {
        id: TaskId,
        launch: LaunchId,
        finished_at: String,
    },
}
