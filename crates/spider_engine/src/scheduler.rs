//! Single-owner actor around [`SchedulerState`].
//!
//! Every tracking change goes through [`spider_core::update`]; this module
//! only executes the returned effects and runs the engine lifecycle.

use std::collections::HashMap;
use std::mem;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use engine_logging::{engine_debug, engine_info, engine_warn};
use spider_core::{
    update, CompletedTask, Effect, EngineState, LaunchId, Msg, PauseView, Phase, SchedulerState,
    Severity, StatusEntry, TaskId,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserDriver, PageRegistry};
use crate::config::{EngineConfig, TimingConfig};
use crate::download::{DownloadManager, DownloadSettings};
use crate::events::EventSink;
use crate::extract::TimelineExtractor;
use crate::launcher::Launch;
use crate::mission::MissionContext;
use crate::slots::SlotPool;
use crate::task_store::TaskStore;
use crate::{EngineEvent, MediaFetcher, ProgressSink};

pub(crate) enum Command {
    Start,
    Stop,
    Enqueue {
        id: TaskId,
        reply: std_mpsc::Sender<bool>,
    },
    Delete(TaskId),
    Pause(TaskId),
    Resume(TaskId),
    PauseAll,
    ResumeAll,
    ClearAll,
    Status {
        reply: std_mpsc::Sender<Vec<StatusEntry>>,
    },
    Completed {
        reply: std_mpsc::Sender<Vec<CompletedTask>>,
    },
    /// Warm-up of start `generation` finished.
    Ready { generation: u64 },
    StartFailed { generation: u64, reason: String },
    ContextClosed { generation: u64 },
    /// A launcher holds a slot and asks to run. Answered with whether it may.
    Admit {
        id: TaskId,
        launch: LaunchId,
        reply: oneshot::Sender<bool>,
    },
    Report(Msg),
    Shutdown,
}

pub(crate) struct Scheduler {
    state: SchedulerState,
    ctx: Arc<MissionContext>,
    pauses: watch::Sender<PauseView>,
    commands: mpsc::UnboundedSender<Command>,
    launchers: HashMap<TaskId, (LaunchId, CancellationToken)>,
    /// Parent of every launcher token; replaced on each start.
    session: CancellationToken,
    generation: u64,
    store: TaskStore,
}

impl Scheduler {
    pub(crate) fn new(
        config: EngineConfig,
        driver: Arc<dyn BrowserDriver>,
        fetcher: Arc<dyn MediaFetcher>,
        sink: Arc<dyn ProgressSink>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let events = EventSink::new(sink);
        let downloads = DownloadManager::new(
            DownloadSettings::from_config(&config),
            fetcher,
            events.progress_sink(),
        );
        let store = TaskStore::new(config.task_file.clone());
        let ctx = MissionContext {
            slots: SlotPool::new(config.concurrency()),
            extractor: Arc::new(TimelineExtractor::with_default_markers(
                config.site_base_url.clone(),
            )),
            config: Arc::new(config),
            driver,
            downloads,
            pages: PageRegistry::new(),
            identity: Mutex::new(None),
            events,
        };
        let (pauses, _) = watch::channel(PauseView::default());

        Self {
            state: SchedulerState::new(),
            ctx: Arc::new(ctx),
            pauses,
            commands,
            launchers: HashMap::new(),
            session: CancellationToken::new(),
            generation: 0,
            store,
        }
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        self.restore();

        while let Some(command) = inbox.recv().await {
            match command {
                Command::Start => self.start(),
                Command::Stop => self.stop(None).await,
                Command::Enqueue { id, reply } => {
                    let accepted = self.state.admits(&id);
                    self.apply(Msg::Enqueue(id));
                    let _ = reply.send(accepted);
                }
                Command::Delete(id) => self.apply(Msg::Delete(id)),
                Command::Pause(id) => self.apply(Msg::Pause(id)),
                Command::Resume(id) => self.apply(Msg::Resume(id)),
                Command::PauseAll => self.apply(Msg::PauseAll),
                Command::ResumeAll => self.apply(Msg::ResumeAll),
                Command::ClearAll => self.apply(Msg::ClearAll),
                Command::Status { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Completed { reply } => {
                    let _ = reply.send(self.state.completed());
                }
                Command::Ready { generation } => {
                    if self.is_starting(generation) {
                        self.apply(Msg::EngineReady);
                    }
                }
                Command::StartFailed { generation, reason } => {
                    if self.is_starting(generation) {
                        self.session.cancel();
                        self.apply(Msg::EngineStopped {
                            reason: Some(reason),
                        });
                        self.ctx.downloads.stop().await;
                    }
                }
                Command::ContextClosed { generation } => {
                    if generation == self.generation && self.state.engine() != EngineState::Idle {
                        self.ctx
                            .events
                            .log(Severity::Warning, "Browser context closed unexpectedly");
                        self.stop(Some("browser context closed".to_string())).await;
                    }
                }
                Command::Admit { id, launch, reply } => {
                    self.apply(Msg::MissionStarted {
                        id: id.clone(),
                        launch,
                    });
                    let running = self.state.phase(&id) == Some(Phase::Running { launch });
                    let _ = reply.send(running);
                }
                Command::Report(msg) => self.apply(msg),
                Command::Shutdown => {
                    self.stop(None).await;
                    break;
                }
            }
        }
        engine_info!("Scheduler exited");
    }

    fn restore(&mut self) {
        let saved = self.store.load();
        if saved.is_empty() {
            return;
        }
        let count = saved.len();
        for id in saved {
            self.apply(Msg::Enqueue(id));
        }
        self.ctx
            .events
            .log(Severity::Info, format!("Restored {count} tasks"));
    }

    fn is_starting(&self, generation: u64) -> bool {
        generation == self.generation && self.state.engine() == EngineState::Starting
    }

    fn snapshot(&self) -> Vec<StatusEntry> {
        let downloads = &self.ctx.downloads;
        self.state.snapshot(|id| downloads.succeeded(id))
    }

    fn start(&mut self) {
        if self.state.engine() != EngineState::Idle {
            self.ctx
                .events
                .log(Severity::Secondary, "Engine is already running");
            return;
        }
        self.generation += 1;
        self.session = CancellationToken::new();
        self.apply(Msg::EngineStarting);

        let ctx = Arc::clone(&self.ctx);
        let commands = self.commands.clone();
        let session = self.session.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let config = &ctx.config;
            ctx.events.log(
                Severity::Info,
                format!(
                    "Starting engine ({} concurrent tasks, {} download workers)",
                    config.concurrency(),
                    config.download_workers()
                ),
            );
            ctx.downloads.start(config.download_workers());

            let launched = tokio::select! {
                biased;
                _ = session.cancelled() => return,
                launched = ctx.driver.launch() => launched,
            };
            if let Err(err) = launched {
                let _ = commands.send(Command::StartFailed {
                    generation,
                    reason: format!("browser failed to start: {err}"),
                });
                return;
            }
            ctx.events.log(Severity::Success, "Browser ready");
            if config.deep_scan {
                ctx.events.log(
                    Severity::Warning,
                    "Deep scan is on: feeds are walked to the end regardless of history",
                );
            }

            tokio::select! {
                biased;
                _ = session.cancelled() => return,
                _ = tokio::time::sleep(TimingConfig::ms(config.timing.warmup_ms)) => {}
            }
            let _ = commands.send(Command::Ready { generation });

            tokio::select! {
                biased;
                _ = session.cancelled() => {}
                _ = ctx.driver.closed() => {
                    let _ = commands.send(Command::ContextClosed { generation });
                }
            }
        });
    }

    /// Stops crawling. `reason` marks an unexpected stop that fails active tasks.
    async fn stop(&mut self, reason: Option<String>) {
        if self.state.engine() == EngineState::Idle {
            engine_debug!("Stop requested while idle");
            return;
        }
        self.session.cancel();
        self.apply(Msg::EngineStopped { reason });
        self.ctx.downloads.stop().await;

        let grace = TimingConfig::ms(self.ctx.config.timing.shutdown_grace_ms);
        let poll = self.ctx.config.timing.slice();
        let closed = tokio::time::timeout(grace, async {
            while !self.ctx.pages.is_empty() {
                tokio::time::sleep(poll).await;
            }
        })
        .await;
        if closed.is_err() {
            engine_warn!(
                "{} pages still open after stop, shutting the browser down anyway",
                self.ctx.pages.len()
            );
        }
        engine_debug!("Driver reports {} open pages", self.ctx.driver.page_count().await);
        self.ctx.driver.shutdown().await;
    }

    fn apply(&mut self, msg: Msg) {
        let engine_before = self.state.engine();
        let (state, effects) = update(mem::take(&mut self.state), msg);
        self.state = state;

        for effect in effects {
            self.execute(effect);
        }

        let state = &self.state;
        self.launchers.retain(|id, (launch, token)| {
            let current = state.is_current(id, *launch);
            if !current {
                token.cancel();
            }
            current
        });

        let engine_after = self.state.engine();
        if engine_after != engine_before {
            self.ctx.events.emit(EngineEvent::State(engine_after));
        }
    }

    fn execute(&mut self, effect: Effect) {
        let ctx = &self.ctx;
        match effect {
            Effect::SpawnLauncher { id, launch } => {
                let token = self.session.child_token();
                if let Some((_, previous)) =
                    self.launchers.insert(id.clone(), (launch, token.clone()))
                {
                    previous.cancel();
                }
                let launcher = Launch {
                    ctx: Arc::clone(ctx),
                    id,
                    launch,
                    token,
                    pauses: self.pauses.subscribe(),
                    commands: self.commands.clone(),
                };
                tokio::spawn(launcher.run());
            }
            Effect::CancelLauncher { id, launch } => {
                if matches!(self.launchers.get(&id), Some((tracked, _)) if *tracked == launch) {
                    if let Some((_, token)) = self.launchers.remove(&id) {
                        token.cancel();
                    }
                }
            }
            Effect::RegisterDownloads(id) => ctx.downloads.register(&id),
            Effect::DeregisterDownloads(id) => ctx.downloads.deregister(&id),
            Effect::DeregisterAllDownloads => ctx.downloads.deregister_all(),
            Effect::ResetSlots => ctx.slots.reset(),
            Effect::PublishPauses => {
                self.pauses.send_replace(self.state.pause_view());
            }
            Effect::Log { severity, message } => ctx.events.log(severity, message),
            Effect::StatusChanged => ctx.events.emit(EngineEvent::Status(self.snapshot())),
            Effect::TaskFinished(id) => ctx.events.emit(EngineEvent::TaskFinished(id)),
            Effect::PersistTasks(ids) => self.store.save(&ids),
        }
    }
}
