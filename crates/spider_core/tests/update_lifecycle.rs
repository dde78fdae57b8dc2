use pretty_assertions::assert_eq;
use spider_core::{
    update, Effect, MissionOutcome, Msg, Phase, SchedulerState, TaskId, COMPLETED_HISTORY_LIMIT,
};

fn init_logging() {
    engine_logging::initialize_for_tests();
}

/// Ready engine with `id` admitted and its mission started.
fn running(id: &TaskId) -> (SchedulerState, u64) {
    let (state, _) = update(SchedulerState::new(), Msg::EngineStarting);
    let (state, _) = update(state, Msg::EngineReady);
    let (state, effects) = update(state, Msg::Enqueue(id.clone()));
    let launch = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::SpawnLauncher { launch, .. } => Some(*launch),
            _ => None,
        })
        .expect("spawn effect");
    let (state, effects) = update(
        state,
        Msg::MissionStarted {
            id: id.clone(),
            launch,
        },
    );
    assert!(effects.contains(&Effect::RegisterDownloads(id.clone())));
    (state, launch)
}

#[test]
fn finished_mission_drains_before_completion() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, launch) = running(&id);

    let (state, effects) = update(
        state,
        Msg::MissionEnded {
            id: id.clone(),
            launch,
            outcome: MissionOutcome::Finished,
        },
    );
    assert_eq!(state.phase(&id), Some(Phase::Draining { launch }));
    assert!(!effects
        .iter()
        .any(|effect| matches!(effect, Effect::TaskFinished(_))));
    assert!(state.completed().is_empty());

    let (state, effects) = update(
        state,
        Msg::DownloadsDrained {
            id: id.clone(),
            launch,
            finished_at: "12:00:00".into(),
        },
    );
    assert_eq!(state.phase(&id), None);
    assert!(effects.contains(&Effect::TaskFinished(id.clone())));
    assert!(effects.contains(&Effect::PersistTasks(Vec::new())));
    assert_eq!(state.completed()[0].id, id);
    assert_eq!(state.completed()[0].time, "12:00:00");
}

#[test]
fn stale_reports_from_an_old_launch_are_ignored() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, old_launch) = running(&id);

    let (state, _) = update(state, Msg::Delete(id.clone()));
    let (state, effects) = update(state, Msg::Enqueue(id.clone()));
    let new_launch = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::SpawnLauncher { launch, .. } => Some(*launch),
            _ => None,
        })
        .expect("spawn effect");
    assert_ne!(old_launch, new_launch);

    let before = state.clone();
    let (state, effects) = update(
        state,
        Msg::MissionEnded {
            id: id.clone(),
            launch: old_launch,
            outcome: MissionOutcome::Cancelled,
        },
    );
    assert_eq!(state, before);
    assert!(effects.is_empty());
    assert!(!state.is_current(&id, old_launch));
    assert!(state.is_current(&id, new_launch));
}

#[test]
fn suspend_and_resume_round_trip_keeps_launch() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, launch) = running(&id);

    let (state, _) = update(state, Msg::Pause(id.clone()));
    let (state, _) = update(
        state,
        Msg::MissionSuspended {
            id: id.clone(),
            launch,
        },
    );
    assert_eq!(state.phase(&id), Some(Phase::Suspended { launch }));

    let (state, _) = update(state, Msg::Resume(id.clone()));
    assert!(!state.is_paused(&id));
    let (state, _) = update(
        state,
        Msg::MissionResumed {
            id: id.clone(),
            launch,
        },
    );
    assert_eq!(state.phase(&id), Some(Phase::Running { launch }));
}

#[test]
fn cancelled_mission_is_untracked() {
    init_logging();
    let id = TaskId::from("nasa");
    let (state, launch) = running(&id);

    let (state, _) = update(
        state,
        Msg::MissionEnded {
            id: id.clone(),
            launch,
            outcome: MissionOutcome::Cancelled,
        },
    );
    assert_eq!(state.phase(&id), None);
    assert!(!state.is_failed(&id));
}

#[test]
fn completed_list_is_most_recent_first_and_capped() {
    init_logging();
    let mut state = SchedulerState::new();
    let (next, _) = update(state, Msg::EngineStarting);
    let (next, _) = update(next, Msg::EngineReady);
    state = next;

    for n in 0..(COMPLETED_HISTORY_LIMIT + 5) {
        let id = TaskId::new(format!("user{n}"));
        let (next, effects) = update(state, Msg::Enqueue(id.clone()));
        let launch = effects
            .iter()
            .find_map(|effect| match effect {
                Effect::SpawnLauncher { launch, .. } => Some(*launch),
                _ => None,
            })
            .expect("spawn effect");
        let (next, _) = update(
            next,
            Msg::MissionStarted {
                id: id.clone(),
                launch,
            },
        );
        let (next, _) = update(
            next,
            Msg::MissionEnded {
                id: id.clone(),
                launch,
                outcome: MissionOutcome::Finished,
            },
        );
        let (next, _) = update(
            next,
            Msg::DownloadsDrained {
                id,
                launch,
                finished_at: format!("00:00:{n:02}"),
            },
        );
        state = next;
    }

    let completed = state.completed();
    assert_eq!(completed.len(), COMPLETED_HISTORY_LIMIT);
    assert_eq!(
        completed[0].id,
        TaskId::new(format!("user{}", COMPLETED_HISTORY_LIMIT + 4))
    );
}
