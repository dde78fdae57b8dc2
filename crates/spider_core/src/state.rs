use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{Effect, TaskId};

/// Maximum number of entries kept in the completed list.
pub const COMPLETED_HISTORY_LIMIT: usize = 50;

/// Identifies one launcher run of a task. Reports carrying an older launch id
/// than the one currently tracked are stale and ignored.
pub type LaunchId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Not running; queued tasks wait as pending.
    #[default]
    Idle,
    Starting,
    Ready,
}

/// Where an active task currently lives. A task has exactly one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Queued,
    /// Launcher spawned, waiting for a slot.
    Transitioning { launch: LaunchId },
    Running { launch: LaunchId },
    /// Paused inside the mission with its slot released.
    Suspended { launch: LaunchId },
    /// Feed exhausted; waiting for the task's downloads to drain.
    Draining { launch: LaunchId },
}

impl Phase {
    pub fn launch(self) -> Option<LaunchId> {
        match self {
            Phase::Queued => None,
            Phase::Transitioning { launch }
            | Phase::Running { launch }
            | Phase::Suspended { launch }
            | Phase::Draining { launch } => Some(launch),
        }
    }
}

/// Terminal status reported by a mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissionOutcome {
    Finished,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub id: TaskId,
    /// Local completion time, `HH:MM:SS`.
    pub time: String,
}

/// Snapshot of the pause flags shared with launchers and missions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PauseView {
    pub global: bool,
    pub tasks: BTreeSet<TaskId>,
}

impl PauseView {
    pub fn is_paused(&self, id: &TaskId) -> bool {
        self.global || self.tasks.contains(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tracked {
    pub(crate) phase: Phase,
    /// Admission order; the queue is drained lowest first.
    pub(crate) admitted: u64,
    /// Order of the last phase change, used for display.
    pub(crate) seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Failure {
    pub(crate) message: String,
    pub(crate) admitted: u64,
    pub(crate) seq: u64,
}

/// All scheduler tracking state. Owned by a single serial context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchedulerState {
    pub(crate) engine: EngineState,
    pub(crate) tasks: BTreeMap<TaskId, Tracked>,
    pub(crate) failed: BTreeMap<TaskId, Failure>,
    pub(crate) paused: BTreeSet<TaskId>,
    pub(crate) global_paused: bool,
    pub(crate) completed: VecDeque<CompletedTask>,
    next_seq: u64,
    next_launch: LaunchId,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self) -> EngineState {
        self.engine
    }

    pub fn phase(&self, id: &TaskId) -> Option<Phase> {
        self.tasks.get(id).map(|tracked| tracked.phase)
    }

    /// True when `enqueue(id)` would be accepted.
    pub fn admits(&self, id: &TaskId) -> bool {
        !self.tasks.contains_key(id)
    }

    pub fn is_failed(&self, id: &TaskId) -> bool {
        self.failed.contains_key(id)
    }

    pub fn failure(&self, id: &TaskId) -> Option<&str> {
        self.failed.get(id).map(|failure| failure.message.as_str())
    }

    pub fn is_paused(&self, id: &TaskId) -> bool {
        self.global_paused || self.paused.contains(id)
    }

    pub fn is_globally_paused(&self) -> bool {
        self.global_paused
    }

    /// True when `launch` is the current launcher run for `id`.
    pub fn is_current(&self, id: &TaskId, launch: LaunchId) -> bool {
        self.phase(id).and_then(Phase::launch) == Some(launch)
    }

    pub fn pause_view(&self) -> PauseView {
        PauseView {
            global: self.global_paused,
            tasks: self.paused.clone(),
        }
    }

    /// Most recent first, at most [`COMPLETED_HISTORY_LIMIT`] entries.
    pub fn completed(&self) -> Vec<CompletedTask> {
        self.completed.iter().cloned().collect()
    }

    /// Every tracked task that has not finished, in admission order.
    pub fn unfinished_task_ids(&self) -> Vec<TaskId> {
        let mut entries: Vec<(u64, &TaskId)> = self
            .tasks
            .iter()
            .map(|(id, tracked)| (tracked.admitted, id))
            .chain(self.failed.iter().map(|(id, failure)| (failure.admitted, id)))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id.clone()).collect()
    }

    pub(crate) fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn set_phase(&mut self, id: &TaskId, phase: Phase) {
        let seq = self.bump_seq();
        if let Some(tracked) = self.tasks.get_mut(id) {
            tracked.phase = phase;
            tracked.seq = seq;
        }
    }

    /// Inserts a freshly admitted task at the tail of the queue.
    pub(crate) fn admit(&mut self, id: TaskId) {
        let seq = self.bump_seq();
        self.failed.remove(&id);
        self.tasks.insert(
            id,
            Tracked {
                phase: Phase::Queued,
                admitted: seq,
                seq,
            },
        );
    }

    pub(crate) fn mark_failed(&mut self, id: &TaskId, message: String) {
        let admitted = self
            .tasks
            .remove(id)
            .map(|tracked| tracked.admitted)
            .unwrap_or_else(|| self.next_seq + 1);
        let seq = self.bump_seq();
        self.paused.remove(id);
        self.failed.insert(
            id.clone(),
            Failure {
                message,
                admitted,
                seq,
            },
        );
    }

    pub(crate) fn record_completed(&mut self, id: TaskId, time: String) {
        self.completed.push_front(CompletedTask { id, time });
        self.completed.truncate(COMPLETED_HISTORY_LIMIT);
    }

    /// Moves queued tasks into launchers while the engine is ready.
    pub(crate) fn dispatch(&mut self) -> Vec<Effect> {
        if self.engine != EngineState::Ready {
            return Vec::new();
        }
        let mut queued: Vec<(u64, TaskId)> = self
            .tasks
            .iter()
            .filter(|(_, tracked)| tracked.phase == Phase::Queued)
            .map(|(id, tracked)| (tracked.admitted, id.clone()))
            .collect();
        queued.sort();

        let mut effects = Vec::with_capacity(queued.len());
        for (_, id) in queued {
            self.next_launch += 1;
            let launch = self.next_launch;
            self.set_phase(&id, Phase::Transitioning { launch });
            effects.push(Effect::SpawnLauncher { id, launch });
        }
        effects
    }
}
