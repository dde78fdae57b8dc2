use std::sync::Once;

use pretty_assertions::assert_eq;
use spider_core::{
    update, Effect, MissionOutcome, Msg, Phase, SchedulerState, Severity, TaskId,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

fn ready_state() -> SchedulerState {
    let (state, _) = update(SchedulerState::new(), Msg::EngineStarting);
    let (state, _) = update(state, Msg::EngineReady);
    state
}

fn spawned(effects: &[Effect]) -> Vec<(TaskId, u64)> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::SpawnLauncher { id, launch } => Some((id.clone(), *launch)),
            _ => None,
        })
        .collect()
}

#[test]
fn enqueue_while_idle_keeps_task_queued() {
    init_logging();
    let id = TaskId::from("nasa");
    let state = SchedulerState::new();
    assert!(state.admits(&id));

    let (state, effects) = update(state, Msg::Enqueue(id.clone()));

    assert_eq!(state.phase(&id), Some(Phase::Queued));
    assert!(spawned(&effects).is_empty());
    assert_eq!(
        effects,
        vec![
            Effect::Log {
                severity: Severity::Info,
                message: "Task [nasa] added to queue".to_string(),
            },
            Effect::StatusChanged,
            Effect::PersistTasks(vec![id]),
        ]
    );
}

#[test]
fn engine_ready_dispatches_queue_in_admission_order() {
    init_logging();
    let (state, _) = update(SchedulerState::new(), Msg::Enqueue("b".into()));
    let (state, _) = update(state, Msg::Enqueue("a".into()));
    let (state, _) = update(state, Msg::EngineStarting);
    let (state, effects) = update(state, Msg::EngineReady);

    let launches = spawned(&effects);
    assert_eq!(
        launches.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
        vec!["b", "a"]
    );
    for (id, launch) in launches {
        assert_eq!(state.phase(&id), Some(Phase::Transitioning { launch }));
    }
}

#[test]
fn enqueue_on_ready_engine_spawns_launcher_immediately() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, effects) = update(ready_state(), Msg::Enqueue(id.clone()));

    let launches = spawned(&effects);
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, id);
    assert!(state.is_current(&id, launches[0].1));
}

#[test]
fn duplicate_enqueue_is_rejected_in_every_active_phase() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, effects) = update(ready_state(), Msg::Enqueue(id.clone()));
    let launch = spawned(&effects)[0].1;

    let reject = |state: SchedulerState| {
        assert!(!state.admits(&id));
        let (next, effects) = update(state.clone(), Msg::Enqueue(id.clone()));
        assert_eq!(next, state);
        assert_eq!(
            effects,
            vec![Effect::Log {
                severity: Severity::Warning,
                message: "Task [nasa] is already in progress".to_string(),
            }]
        );
        next
    };

    // Transitioning.
    let state = reject(state);
    // Running.
    let (state, _) = update(
        state,
        Msg::MissionStarted {
            id: id.clone(),
            launch,
        },
    );
    let state = reject(state);
    // Paused while running.
    let (state, _) = update(state, Msg::Pause(id.clone()));
    let state = reject(state);
    // Suspended.
    let (state, _) = update(
        state,
        Msg::MissionSuspended {
            id: id.clone(),
            launch,
        },
    );
    assert_eq!(state.phase(&id), Some(Phase::Suspended { launch }));
    reject(state);
}

#[test]
fn failed_task_can_be_requeued_and_marker_is_cleared() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, effects) = update(ready_state(), Msg::Enqueue(id.clone()));
    let launch = spawned(&effects)[0].1;
    let (state, _) = update(
        state,
        Msg::MissionStarted {
            id: id.clone(),
            launch,
        },
    );
    let (state, _) = update(
        state,
        Msg::MissionEnded {
            id: id.clone(),
            launch,
            outcome: MissionOutcome::Failed("rate limit detected".into()),
        },
    );
    assert!(state.is_failed(&id));
    assert_eq!(state.phase(&id), None);
    assert!(state.admits(&id));

    let (state, effects) = update(state, Msg::Enqueue(id.clone()));
    assert!(!state.is_failed(&id));
    assert_eq!(spawned(&effects).len(), 1);
    assert!(matches!(
        state.phase(&id),
        Some(Phase::Transitioning { .. })
    ));
}

#[test]
fn resume_of_failed_task_requeues_it() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, effects) = update(ready_state(), Msg::Enqueue(id.clone()));
    let launch = spawned(&effects)[0].1;
    let (state, _) = update(
        state,
        Msg::MissionStarted {
            id: id.clone(),
            launch,
        },
    );
    let (state, _) = update(
        state,
        Msg::MissionEnded {
            id: id.clone(),
            launch,
            outcome: MissionOutcome::Failed("boom".into()),
        },
    );

    let (state, effects) = update(state, Msg::Resume(id.clone()));
    assert!(!state.is_failed(&id));
    let relaunch = spawned(&effects);
    assert_eq!(relaunch.len(), 1);
    assert_ne!(relaunch[0].1, launch);
}
