use std::path::PathBuf;
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Duration;

use engine_logging::engine_error;
use spider_core::{CompletedTask, StatusEntry, TaskId};
use tokio::sync::mpsc;

use crate::browser::BrowserDriver;
use crate::config::EngineConfig;
use crate::fetch::{ChannelProgressSink, FetchSettings, MediaFetcher, ReqwestFetcher};
use crate::history::{self, HistoryStat};
use crate::scheduler::{Command, Scheduler};
use crate::{EngineEvent, FetchError};

/// Synchronous front door to the engine.
///
/// The engine runs on its own thread with a tokio runtime. Commands go in over
/// a channel; events come back over another and are drained with [`Self::try_recv`].
pub struct EngineHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_rx: std_mpsc::Receiver<EngineEvent>,
    save_path: PathBuf,
    thread: Option<thread::JoinHandle<()>>,
}

impl EngineHandle {
    /// Builds the engine and restores saved tasks. Crawling begins after [`Self::start`].
    pub fn new(
        config: EngineConfig,
        driver: Arc<dyn BrowserDriver>,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = std_mpsc::channel();
        let save_path = config.save_path.clone();
        let sink = Arc::new(ChannelProgressSink::new(event_tx));
        let scheduler = Scheduler::new(config, driver, fetcher, sink, cmd_tx.clone());

        let spawned = thread::Builder::new()
            .name("spider-engine".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        engine_error!("Failed to build the engine runtime: {}", err);
                        return;
                    }
                };
                runtime.block_on(scheduler.run(cmd_rx));
            });
        let thread = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                engine_error!("Failed to spawn the engine thread: {}", err);
                None
            }
        };

        Self {
            cmd_tx,
            event_rx,
            save_path,
            thread,
        }
    }

    /// Same as [`Self::new`] with the HTTP fetcher configured from `config`.
    pub fn with_reqwest(
        config: EngineConfig,
        driver: Arc<dyn BrowserDriver>,
    ) -> Result<Self, FetchError> {
        let settings = FetchSettings {
            request_timeout: config.timeout(),
            ..FetchSettings::default()
        };
        let fetcher = Arc::new(ReqwestFetcher::new(settings)?);
        Ok(Self::new(config, driver, fetcher))
    }

    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Returns false when the task is already tracked.
    pub fn enqueue(&self, id: impl Into<TaskId>) -> bool {
        let (reply, answer) = std_mpsc::channel();
        self.send(Command::Enqueue {
            id: id.into(),
            reply,
        });
        answer.recv().unwrap_or(false)
    }

    pub fn delete(&self, id: impl Into<TaskId>) {
        self.send(Command::Delete(id.into()));
    }

    pub fn pause(&self, id: impl Into<TaskId>) {
        self.send(Command::Pause(id.into()));
    }

    /// Unpauses a task, or re-queues it from scratch if it failed.
    pub fn resume(&self, id: impl Into<TaskId>) {
        self.send(Command::Resume(id.into()));
    }

    pub fn pause_all(&self) {
        self.send(Command::PauseAll);
    }

    pub fn resume_all(&self) {
        self.send(Command::ResumeAll);
    }

    pub fn clear_all(&self) {
        self.send(Command::ClearAll);
    }

    pub fn status_snapshot(&self) -> Vec<StatusEntry> {
        let (reply, answer) = std_mpsc::channel();
        self.send(Command::Status { reply });
        answer.recv().unwrap_or_default()
    }

    /// Most recent first.
    pub fn completed_tasks(&self) -> Vec<CompletedTask> {
        let (reply, answer) = std_mpsc::channel();
        self.send(Command::Completed { reply });
        answer.recv().unwrap_or_default()
    }

    /// History entry counts per destination under the save root.
    pub fn history_stats(&self) -> Vec<HistoryStat> {
        history::stats(&self.save_path)
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    fn send(&self, command: Command) {
        if self.cmd_tx.send(command).is_err() {
            engine_error!("Engine thread is gone; command dropped");
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
