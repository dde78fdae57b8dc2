use crate::{
    EngineState, Effect, LaunchId, MissionOutcome, Msg, Phase, SchedulerState, Severity, TaskId,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: SchedulerState, msg: Msg) -> (SchedulerState, Vec<Effect>) {
    let effects = match msg {
        Msg::Enqueue(id) => enqueue(&mut state, id),
        Msg::Delete(id) => delete(&mut state, id),
        Msg::Pause(id) => {
            if state.tasks.contains_key(&id) && state.paused.insert(id.clone()) {
                vec![
                    Effect::log(Severity::Info, format!("Task [{id}] paused")),
                    Effect::PublishPauses,
                    Effect::StatusChanged,
                ]
            } else {
                Vec::new()
            }
        }
        Msg::Resume(id) => {
            if state.is_failed(&id) {
                enqueue(&mut state, id)
            } else if state.paused.remove(&id) {
                vec![
                    Effect::log(Severity::Info, format!("Task [{id}] resumed")),
                    Effect::PublishPauses,
                    Effect::StatusChanged,
                ]
            } else {
                Vec::new()
            }
        }
        Msg::PauseAll => {
            state.global_paused = true;
            vec![
                Effect::log(Severity::Warning, "All tasks paused"),
                Effect::PublishPauses,
                Effect::StatusChanged,
            ]
        }
        Msg::ResumeAll => {
            state.global_paused = false;
            state.paused.clear();
            vec![
                Effect::log(Severity::Success, "All tasks resumed"),
                Effect::PublishPauses,
                Effect::StatusChanged,
            ]
        }
        Msg::ClearAll => clear_all(&mut state),
        Msg::EngineStarting => {
            state.engine = EngineState::Starting;
            vec![Effect::StatusChanged]
        }
        Msg::EngineReady => {
            state.engine = EngineState::Ready;
            let mut effects = state.dispatch();
            effects.push(Effect::StatusChanged);
            effects
        }
        Msg::EngineStopped { reason } => engine_stopped(&mut state, reason),
        Msg::MissionStarted { id, launch } => {
            if state.phase(&id) == Some(Phase::Transitioning { launch }) {
                state.set_phase(&id, Phase::Running { launch });
                vec![
                    Effect::RegisterDownloads(id.clone()),
                    Effect::log(Severity::Info, format!("Starting task [{id}]")),
                    Effect::StatusChanged,
                ]
            } else {
                Vec::new()
            }
        }
        Msg::MissionSuspended { id, launch } => {
            if state.phase(&id) == Some(Phase::Running { launch }) {
                state.set_phase(&id, Phase::Suspended { launch });
                vec![
                    Effect::log(
                        Severity::Info,
                        format!("Task [{id}] suspended, slot released"),
                    ),
                    Effect::StatusChanged,
                ]
            } else {
                Vec::new()
            }
        }
        Msg::MissionResumed { id, launch } => {
            if state.phase(&id) == Some(Phase::Suspended { launch }) {
                state.set_phase(&id, Phase::Running { launch });
                vec![
                    Effect::log(Severity::Success, format!("Task [{id}] running again")),
                    Effect::StatusChanged,
                ]
            } else {
                Vec::new()
            }
        }
        Msg::MissionEnded {
            id,
            launch,
            outcome,
        } => mission_ended(&mut state, id, launch, outcome),
        Msg::DownloadsDrained {
            id,
            launch,
            finished_at,
        } => {
            if state.phase(&id) == Some(Phase::Draining { launch }) {
                state.tasks.remove(&id);
                state.paused.remove(&id);
                state.record_completed(id.clone(), finished_at);
                vec![
                    Effect::DeregisterDownloads(id.clone()),
                    Effect::log(Severity::Success, format!("Task [{id}] finished")),
                    Effect::TaskFinished(id),
                    Effect::StatusChanged,
                    Effect::PersistTasks(state.unfinished_task_ids()),
                ]
            } else {
                Vec::new()
            }
        }
    };

    (state, effects)
}

fn enqueue(state: &mut SchedulerState, id: TaskId) -> Vec<Effect> {
    if !state.admits(&id) {
        return vec![Effect::log(
            Severity::Warning,
            format!("Task [{id}] is already in progress"),
        )];
    }

    state.admit(id.clone());
    let mut effects = vec![Effect::log(
        Severity::Info,
        format!("Task [{id}] added to queue"),
    )];
    effects.extend(state.dispatch());
    effects.push(Effect::StatusChanged);
    effects.push(Effect::PersistTasks(state.unfinished_task_ids()));
    effects
}

fn delete(state: &mut SchedulerState, id: TaskId) -> Vec<Effect> {
    let mut effects = Vec::new();
    if let Some(tracked) = state.tasks.remove(&id) {
        let (severity, message) = match tracked.phase {
            Phase::Queued => (Severity::Warning, format!("Removed [{id}] from queue")),
            Phase::Transitioning { .. } => {
                (Severity::Warning, format!("Removed waiting task [{id}]"))
            }
            Phase::Running { .. } | Phase::Suspended { .. } | Phase::Draining { .. } => {
                (Severity::Warning, format!("Removed running task [{id}]"))
            }
        };
        if let Some(launch) = tracked.phase.launch() {
            effects.push(Effect::CancelLauncher {
                id: id.clone(),
                launch,
            });
        }
        effects.push(Effect::log(severity, message));
    }
    let was_failed = state.failed.remove(&id).is_some();
    if state.paused.remove(&id) {
        effects.push(Effect::PublishPauses);
    }

    let known = !effects.is_empty() || was_failed;
    effects.push(Effect::DeregisterDownloads(id));
    if known {
        effects.push(Effect::StatusChanged);
        effects.push(Effect::PersistTasks(state.unfinished_task_ids()));
    }
    effects
}

fn clear_all(state: &mut SchedulerState) -> Vec<Effect> {
    let mut effects: Vec<Effect> = state
        .tasks
        .iter()
        .filter_map(|(id, tracked)| {
            tracked.phase.launch().map(|launch| Effect::CancelLauncher {
                id: id.clone(),
                launch,
            })
        })
        .collect();

    state.tasks.clear();
    state.failed.clear();
    state.paused.clear();

    effects.extend([
        Effect::DeregisterAllDownloads,
        Effect::ResetSlots,
        Effect::PublishPauses,
        Effect::log(Severity::Success, "Task list cleared"),
        Effect::StatusChanged,
        Effect::PersistTasks(Vec::new()),
    ]);
    effects
}

fn engine_stopped(state: &mut SchedulerState, reason: Option<String>) -> Vec<Effect> {
    state.engine = EngineState::Idle;

    let active: Vec<(TaskId, Phase)> = state
        .tasks
        .iter()
        .filter(|(_, tracked)| tracked.phase != Phase::Queued)
        .map(|(id, tracked)| (id.clone(), tracked.phase))
        .collect();

    let mut effects = Vec::with_capacity(active.len() + 5);
    for (id, phase) in active {
        if let Some(launch) = phase.launch() {
            effects.push(Effect::CancelLauncher {
                id: id.clone(),
                launch,
            });
        }
        match &reason {
            Some(message) => state.mark_failed(&id, message.clone()),
            None => state.set_phase(&id, Phase::Queued),
        }
    }

    effects.push(Effect::DeregisterAllDownloads);
    effects.push(Effect::ResetSlots);
    effects.push(match reason {
        Some(message) => Effect::log(Severity::Danger, format!("Engine stopped: {message}")),
        None => Effect::log(Severity::Success, "Engine stopped"),
    });
    effects.push(Effect::StatusChanged);
    effects.push(Effect::PersistTasks(state.unfinished_task_ids()));
    effects
}

fn mission_ended(
    state: &mut SchedulerState,
    id: TaskId,
    launch: LaunchId,
    outcome: MissionOutcome,
) -> Vec<Effect> {
    if !state.is_current(&id, launch) {
        return Vec::new();
    }

    match outcome {
        MissionOutcome::Finished => {
            state.set_phase(&id, Phase::Draining { launch });
            vec![
                Effect::log(
                    Severity::Info,
                    format!("Task [{id}] collected, waiting for downloads"),
                ),
                Effect::StatusChanged,
            ]
        }
        MissionOutcome::Failed(message) => {
            let log = Effect::log(Severity::Danger, format!("Task [{id}] failed: {message}"));
            state.mark_failed(&id, message);
            vec![
                log,
                Effect::PublishPauses,
                Effect::StatusChanged,
                Effect::PersistTasks(state.unfinished_task_ids()),
            ]
        }
        MissionOutcome::Cancelled => {
            state.tasks.remove(&id);
            state.paused.remove(&id);
            vec![
                Effect::log(Severity::Warning, format!("Task [{id}] cancelled")),
                Effect::PublishPauses,
                Effect::StatusChanged,
                Effect::PersistTasks(state.unfinished_task_ids()),
            ]
        }
    }
}
