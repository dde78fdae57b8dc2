//! Worker pool that turns [`DownloadJob`]s into files on disk.
//!
//! Jobs are admitted only for registered tasks and are re-checked against the
//! registration before every chunk. Deregistering a task, or stopping the
//! manager, also interrupts a transfer parked on a silent connection and
//! removes the partial file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::StreamExt;
use spider_core::TaskId;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, TimingConfig};
use crate::filename::media_id;
use crate::persist::{partial_path, remove_quietly, replace_with_retry};
use crate::{history, DownloadJob, EngineEvent, MediaFetcher, MediaKind, ProgressSink};

/// Retries after the first attempt; a job is tried at most `MAX_RETRIES + 1` times.
pub const MAX_RETRIES: u8 = 2;
/// Liveness is re-checked before each piece of this size is written.
pub const CHUNK_SIZE: usize = 16 * 1024;
/// Existing files larger than this are treated as complete.
pub const COMPLETE_FILE_THRESHOLD: u64 = 1024;
const RENAME_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Root used to locate each owner's history file.
    pub save_root: PathBuf,
    pub max_video_bytes: Option<u64>,
    pub use_tmp_files: bool,
    pub create_link_file: bool,
    /// Dequeue timeout; bounds how long an idle worker takes to notice shutdown.
    pub queue_poll: Duration,
    pub rename_backoff: Duration,
}

impl DownloadSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            save_root: config.save_path.clone(),
            max_video_bytes: config.max_video_bytes(),
            use_tmp_files: config.use_tmp_files,
            create_link_file: config.create_link_file,
            queue_poll: TimingConfig::ms(config.timing.queue_poll_ms.max(1)),
            rename_backoff: TimingConfig::ms(config.timing.rename_backoff_ms),
        }
    }
}

/// Registration a job was admitted under. A task that is deregistered and
/// registered again gets a new one, so jobs from the earlier run stay dead.
type Registration = u64;

enum QueueItem {
    Job(DownloadJob, Registration),
    Shutdown,
}

#[derive(Default)]
struct Ledger {
    next_registration: Registration,
    active: HashMap<TaskId, Registration>,
    pending: HashMap<TaskId, usize>,
    succeeded: HashMap<TaskId, u64>,
}

impl Ledger {
    fn admits(&self, owner: &TaskId, registration: Registration) -> bool {
        self.active.get(owner) == Some(&registration)
    }
}

enum Transfer {
    Done,
    Skipped(String),
    Cancelled,
    Failed(String),
}

struct Inner {
    settings: DownloadSettings,
    fetcher: Arc<dyn MediaFetcher>,
    sink: Arc<dyn ProgressSink>,
    running: AtomicBool,
    ledger: Mutex<Ledger>,
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueItem>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped whenever admission may have been withdrawn.
    revisions: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(
        settings: DownloadSettings,
        fetcher: Arc<dyn MediaFetcher>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                settings,
                fetcher,
                sink,
                running: AtomicBool::new(false),
                ledger: Mutex::new(Ledger::default()),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                workers: Mutex::new(Vec::new()),
                revisions: watch::Sender::new(0),
            }),
        }
    }

    /// Spawns `workers` workers on the current runtime. No-op while running.
    pub fn start(&self, workers: usize) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.discard_stale_items();

        let mut handles = lock(&self.inner.workers);
        for _ in 0..workers.max(1) {
            let inner = Arc::clone(&self.inner);
            handles.push(tokio::spawn(worker_loop(inner)));
        }
        engine_info!("Download workers started ({})", handles.len());
    }

    /// Signals shutdown, sends one sentinel per worker and waits for all of them.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.revoke();
        let handles: Vec<JoinHandle<()>> = lock(&self.inner.workers).drain(..).collect();
        for _ in 0..handles.len() {
            let _ = self.inner.queue_tx.send(QueueItem::Shutdown);
        }
        for handle in handles {
            let _ = handle.await;
        }
        engine_info!("Download workers stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Starts a fresh registration for the task with nothing pending.
    pub fn register(&self, id: &TaskId) {
        let mut ledger = lock(&self.inner.ledger);
        ledger.next_registration += 1;
        let registration = ledger.next_registration;
        ledger.active.insert(id.clone(), registration);
        ledger.pending.insert(id.clone(), 0);
        ledger.succeeded.entry(id.clone()).or_insert(0);
    }

    /// Marks the task inactive and zeroes its pending count.
    pub fn deregister(&self, id: &TaskId) {
        {
            let mut ledger = lock(&self.inner.ledger);
            ledger.active.remove(id);
            ledger.pending.insert(id.clone(), 0);
        }
        self.inner.revoke();
    }

    /// Deregisters every task and forgets session success counters.
    pub fn deregister_all(&self) {
        {
            let mut ledger = lock(&self.inner.ledger);
            ledger.active.clear();
            ledger.pending.clear();
            ledger.succeeded.clear();
        }
        self.inner.revoke();
    }

    pub fn is_registered(&self, id: &TaskId) -> bool {
        lock(&self.inner.ledger).active.contains_key(id)
    }

    /// Queues a job. Returns false, without queueing, when the owner is not registered.
    pub fn submit(&self, job: DownloadJob) -> bool {
        let registration = {
            let mut ledger = lock(&self.inner.ledger);
            let Some(&registration) = ledger.active.get(&job.owner) else {
                return false;
            };
            *ledger.pending.entry(job.owner.clone()).or_insert(0) += 1;
            registration
        };
        let owner = job.owner.clone();
        if self
            .inner
            .queue_tx
            .send(QueueItem::Job(job, registration))
            .is_err()
        {
            self.inner.finish(&owner, registration);
            return false;
        }
        true
    }

    pub fn pending_count(&self, id: &TaskId) -> usize {
        lock(&self.inner.ledger).pending.get(id).copied().unwrap_or(0)
    }

    /// Files written for the task this session.
    pub fn succeeded(&self, id: &TaskId) -> u64 {
        lock(&self.inner.ledger).succeeded.get(id).copied().unwrap_or(0)
    }

    /// Drops items left in the queue by a previous run.
    fn discard_stale_items(&self) {
        let Ok(mut rx) = self.inner.queue_rx.try_lock() else {
            return;
        };
        while let Ok(item) = rx.try_recv() {
            if let QueueItem::Job(job, registration) = item {
                self.inner.finish(&job.owner, registration);
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn worker_loop(inner: Arc<Inner>) {
    loop {
        let next = {
            let mut rx = inner.queue_rx.lock().await;
            tokio::time::timeout(inner.settings.queue_poll, rx.recv()).await
        };
        match next {
            Err(_) => {
                if !inner.is_running() {
                    break;
                }
            }
            Ok(None) | Ok(Some(QueueItem::Shutdown)) => break,
            Ok(Some(QueueItem::Job(job, registration))) => {
                inner.process(job, registration).await
            }
        }
    }
}

impl Inner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Manager running and owner still under the job's registration.
    fn admits(&self, owner: &TaskId, registration: Registration) -> bool {
        self.is_running() && lock(&self.ledger).admits(owner, registration)
    }

    fn revoke(&self) {
        self.revisions.send_modify(|revision| *revision += 1);
    }

    /// Resolves once the job is no longer admitted.
    async fn revoked(&self, owner: &TaskId, registration: Registration) {
        let mut revisions = self.revisions.subscribe();
        while self.admits(owner, registration) {
            if revisions.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Counts one job of `registration` as settled. Jobs from an older
    /// registration leave the current counter alone.
    fn finish(&self, owner: &TaskId, registration: Registration) {
        let mut ledger = lock(&self.ledger);
        if !ledger.admits(owner, registration) {
            return;
        }
        if let Some(pending) = ledger.pending.get_mut(owner) {
            *pending = pending.saturating_sub(1);
        }
    }

    fn record_success(&self, owner: &TaskId) -> u64 {
        let mut ledger = lock(&self.ledger);
        let succeeded = ledger.succeeded.entry(owner.clone()).or_insert(0);
        *succeeded += 1;
        *succeeded
    }

    async fn process(&self, job: DownloadJob, registration: Registration) {
        let owner = job.owner.clone();
        match self.transfer(&job, registration).await {
            Transfer::Done => {
                let dir = owner.kind().destination_dir(&self.settings.save_root);
                history::append(
                    &dir,
                    media_id(&job.clean_url),
                    job.origin_link.as_deref(),
                    self.settings.create_link_file,
                );
                let succeeded = self.record_success(&owner);
                self.sink.emit(EngineEvent::Progress {
                    task: owner.clone(),
                    succeeded,
                });
            }
            Transfer::Skipped(reason) => {
                engine_debug!("Skipped {} for [{}]: {}", job.source_url, owner, reason);
            }
            Transfer::Cancelled => {
                engine_debug!("Stopped {} for [{}] mid-transfer", job.source_url, owner);
            }
            Transfer::Failed(message) => {
                if job.retry_attempt < MAX_RETRIES && self.admits(&owner, registration) {
                    engine_debug!(
                        "Retrying {} for [{}] (attempt {}): {}",
                        job.source_url,
                        owner,
                        job.retry_attempt + 2,
                        message
                    );
                    let retry = DownloadJob {
                        retry_attempt: job.retry_attempt + 1,
                        ..job
                    };
                    if self
                        .queue_tx
                        .send(QueueItem::Job(retry, registration))
                        .is_ok()
                    {
                        return;
                    }
                } else {
                    engine_warn!(
                        "[{}] giving up on {} after {} attempts: {}",
                        job.label,
                        job.source_url,
                        job.retry_attempt + 1,
                        message
                    );
                }
            }
        }
        self.finish(&owner, registration);
    }

    async fn transfer(&self, job: &DownloadJob, registration: Registration) -> Transfer {
        if !self.admits(&job.owner, registration) {
            return Transfer::Skipped("task no longer active".to_string());
        }

        if job.kind == MediaKind::Video {
            match self.fetcher.probe_size(&job.source_url).await {
                Ok(Some(size)) => {
                    if let Some(limit) = self.settings.max_video_bytes {
                        if size > limit {
                            return Transfer::Skipped(format!(
                                "{size} bytes exceeds the {limit} byte cap"
                            ));
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => return Transfer::Skipped(format!("size probe failed: {err}")),
            }
        }

        if let Ok(meta) = tokio::fs::metadata(&job.destination).await {
            if meta.len() > COMPLETE_FILE_THRESHOLD {
                return Transfer::Skipped("already on disk".to_string());
            }
        }
        if let Some(parent) = job.destination.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return Transfer::Failed(err.to_string());
            }
        }

        let target = if self.settings.use_tmp_files {
            partial_path(&job.destination)
        } else {
            job.destination.clone()
        };
        match self.stream_to(job, registration, &target).await {
            Ok(true) => {}
            Ok(false) => {
                remove_quietly(&target).await;
                return Transfer::Cancelled;
            }
            Err(message) => {
                remove_quietly(&target).await;
                return Transfer::Failed(message);
            }
        }

        if self.settings.use_tmp_files {
            if let Err(err) = replace_with_retry(
                &target,
                &job.destination,
                RENAME_ATTEMPTS,
                self.settings.rename_backoff,
            )
            .await
            {
                remove_quietly(&target).await;
                return Transfer::Failed(err.to_string());
            }
        }
        Transfer::Done
    }

    /// Streams the body into `target`. `Ok(false)` means the job was cancelled.
    async fn stream_to(
        &self,
        job: &DownloadJob,
        registration: Registration,
        target: &Path,
    ) -> Result<bool, String> {
        let opened = tokio::select! {
            opened = self.fetcher.open(&job.source_url) => opened,
            _ = self.revoked(&job.owner, registration) => return Ok(false),
        };
        let mut body = opened.map_err(|err| err.to_string())?;
        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|err| err.to_string())?;

        loop {
            let next = tokio::select! {
                next = body.next() => next,
                _ = self.revoked(&job.owner, registration) => return Ok(false),
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|err| err.to_string())?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                if !self.admits(&job.owner, registration) {
                    return Ok(false);
                }
                file.write_all(piece).await.map_err(|err| err.to_string())?;
            }
        }
        file.flush().await.map_err(|err| err.to_string())?;
        Ok(true)
    }
}
