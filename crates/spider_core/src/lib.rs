//! Spider core: pure scheduler state machine and status views.
mod effect;
mod msg;
mod state;
mod task;
mod update;
mod view_model;

pub use effect::{Effect, Severity};
pub use msg::Msg;
pub use state::{
    CompletedTask, EngineState, LaunchId, MissionOutcome, PauseView, Phase, SchedulerState,
    COMPLETED_HISTORY_LIMIT,
};
pub use task::{parse_task_ids, profiles_dir, TaskId, TaskKind, BOOKMARKS_TASK_ID, LIKES_TASK_ID};
pub use update::update;
pub use view_model::{StatusEntry, TaskStatus};
