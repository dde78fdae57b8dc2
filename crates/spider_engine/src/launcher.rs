use std::sync::Arc;

use chrono::Local;
use spider_core::{LaunchId, MissionOutcome, Msg, PauseView, Severity, TaskId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::TimingConfig;
use crate::mission::{Mission, MissionContext};
use crate::scheduler::Command;
use crate::slots::Slot;

/// Waits until `id` is no longer paused. Returns false if cancelled first.
pub(crate) async fn wait_unpaused(
    pauses: &mut watch::Receiver<PauseView>,
    id: &TaskId,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        unpaused = pauses.wait_for(|view| !view.is_paused(id)) => unpaused.is_ok(),
    }
}

/// Takes a task from "waiting for a slot" through its mission to drained downloads.
pub(crate) struct Launch {
    pub(crate) ctx: Arc<MissionContext>,
    pub(crate) id: TaskId,
    pub(crate) launch: LaunchId,
    pub(crate) token: CancellationToken,
    pub(crate) pauses: watch::Receiver<PauseView>,
    pub(crate) commands: mpsc::UnboundedSender<Command>,
}

impl Launch {
    pub(crate) async fn run(mut self) {
        let Some(slot) = self.admit().await else {
            return;
        };

        let mission = Mission {
            ctx: Arc::clone(&self.ctx),
            id: self.id.clone(),
            launch: self.launch,
            token: self.token.clone(),
            pauses: self.pauses.clone(),
            reports: self.commands.clone(),
        };
        let outcome = mission.run(slot).await;
        let finished = outcome == MissionOutcome::Finished;
        self.report(Msg::MissionEnded {
            id: self.id.clone(),
            launch: self.launch,
            outcome,
        });

        if finished && self.drain().await {
            self.report(Msg::DownloadsDrained {
                id: self.id.clone(),
                launch: self.launch,
                finished_at: Local::now().format("%H:%M:%S").to_string(),
            });
        }
    }

    /// Waits for a slot while unpaused, then asks the scheduler to mark the
    /// task running. `None` when cancelled or no longer current.
    async fn admit(&mut self) -> Option<Slot> {
        loop {
            if !wait_unpaused(&mut self.pauses, &self.id, &self.token).await {
                return None;
            }
            self.ctx.events.log(
                Severity::Secondary,
                format!("Task [{}] waiting for a free slot", self.id),
            );
            let slot = tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                acquired = self.ctx.slots.acquire() => acquired.ok()?,
            };
            if self.pauses.borrow().is_paused(&self.id) {
                slot.release();
                continue;
            }

            let (reply, answer) = oneshot::channel();
            let asked = self.commands.send(Command::Admit {
                id: self.id.clone(),
                launch: self.launch,
                reply,
            });
            if asked.is_err() {
                return None;
            }
            return match answer.await {
                Ok(true) => Some(slot),
                _ => None,
            };
        }
    }

    /// Polls until the task has no pending downloads. False if cancelled.
    async fn drain(&self) -> bool {
        let poll = TimingConfig::ms(self.ctx.config.timing.drain_poll_ms.max(1));
        while self.ctx.downloads.pending_count(&self.id) > 0 {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return false,
                _ = tokio::time::sleep(poll) => {}
            }
        }
        !self.token.is_cancelled()
    }

    fn report(&self, msg: Msg) {
        let _ = self.commands.send(Command::Report(msg));
    }
}
