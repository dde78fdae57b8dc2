//! One task's crawl: open a page, intercept feed responses, scroll until the
//! feed is exhausted or caught up.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use engine_logging::engine_debug;
use rand::Rng;
use serde_json::Value;
use spider_core::{LaunchId, MissionOutcome, Msg, PauseView, Severity, TaskId, TaskKind};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserDriver, PageId, PageRegistry, ResponseHandler};
use crate::config::{EngineConfig, TimingConfig};
use crate::download::{lock, DownloadManager};
use crate::events::EventSink;
use crate::extract::{Extractor, MediaItem};
use crate::filename::{clean_url, download_url, media_destination, media_id};
use crate::launcher::wait_unpaused;
use crate::scheduler::Command;
use crate::slots::{Slot, SlotPool};
use crate::{history, DownloadJob, DriverError, MediaKind};

const NAV_ATTEMPTS: u32 = 3;
const MAX_STALLS: u64 = 3;
const JIGGLE_PX: i64 = 600;
const DEEP_SCAN_NOTICE_EVERY: u64 = 100;
const RATE_LIMIT_TEXTS: [&str; 2] = ["Rate limit exceeded", "Cannot retrieve tweets"];

/// Terminal outcomes short-circuit through `?`.
type Step<T> = Result<T, MissionOutcome>;

/// Engine-wide collaborators shared by every mission.
pub(crate) struct MissionContext {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) driver: Arc<dyn BrowserDriver>,
    pub(crate) downloads: DownloadManager,
    pub(crate) slots: SlotPool,
    pub(crate) pages: PageRegistry,
    pub(crate) extractor: Arc<dyn Extractor>,
    /// Signed-in handle sniffed once per engine lifetime.
    pub(crate) identity: Mutex<Option<String>>,
    pub(crate) events: EventSink,
}

pub(crate) struct Mission {
    pub(crate) ctx: Arc<MissionContext>,
    pub(crate) id: TaskId,
    pub(crate) launch: LaunchId,
    pub(crate) token: CancellationToken,
    pub(crate) pauses: watch::Receiver<PauseView>,
    pub(crate) reports: mpsc::UnboundedSender<Command>,
}

impl Mission {
    /// Runs to a terminal outcome. `slot` is held while collecting and
    /// released on every exit path.
    pub(crate) async fn run(mut self, slot: Slot) -> MissionOutcome {
        let config = Arc::clone(&self.ctx.config);
        let dir = self.id.kind().destination_dir(&config.save_path);
        let label = self.label();

        if let Some(restored) = history::recover_from_media(&dir) {
            self.log(
                Severity::Secondary,
                format!("[{label}] rebuilt history from {restored} files on disk"),
            );
        }
        if config.download_videos != config.download_gifs {
            self.log(
                Severity::Warning,
                format!(
                    "[{label}] download_videos={} differs from download_gifs={}; \
                     videos follow download_gifs",
                    config.download_videos, config.download_gifs
                ),
            );
        }

        let driver = Arc::clone(&self.ctx.driver);
        let claimed = self
            .cancellable(self.ctx.pages.claim(&self.id, self.launch, driver.as_ref()))
            .await;
        let (page, reused) = match claimed {
            Ok(Ok(claimed)) => claimed,
            Ok(Err(err)) => {
                return MissionOutcome::Failed(format!("could not open a page: {err}"))
            }
            Err(outcome) => return outcome,
        };
        if reused {
            self.log(
                Severity::Secondary,
                format!("[{label}] found its page still open, reusing it"),
            );
        }

        let collector = Arc::new(Collector::new(
            &self.ctx,
            self.id.clone(),
            label,
            dir.clone(),
            history::load(&dir),
        ));
        let mut slot = Some(slot);
        let outcome = match self.crawl(page, &collector, &mut slot).await {
            Ok(()) => MissionOutcome::Finished,
            Err(outcome) => outcome,
        };

        collector.deactivate();
        drop(slot);
        if self.ctx.pages.release(&self.id, self.launch) {
            if let Err(err) = driver.close_page(page).await {
                engine_debug!("Closing page for [{}] failed: {}", self.id, err);
            }
        } else {
            engine_debug!("Page of [{}] was taken over by a newer launch", self.id);
        }
        outcome
    }

    fn label(&self) -> String {
        self.id.kind().label()
    }

    fn log(&self, severity: Severity, message: String) {
        self.ctx.events.log(severity, message);
    }

    fn report(&self, msg: Msg) {
        let _ = self.reports.send(Command::Report(msg));
    }

    fn is_paused(&self) -> bool {
        self.pauses.borrow().is_paused(&self.id)
    }

    /// Runs `fut` unless the mission is cancelled first.
    async fn cancellable<T>(&self, fut: impl Future<Output = T>) -> Step<T> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(MissionOutcome::Cancelled),
            value = fut => Ok(value),
        }
    }

    /// Like [`Self::cancellable`], with driver errors failing the mission.
    async fn guard<T>(&self, fut: impl Future<Output = Result<T, DriverError>>) -> Step<T> {
        self.cancellable(fut)
            .await?
            .map_err(|err| MissionOutcome::Failed(err.to_string()))
    }

    /// Sleeps `total` in slices, ending early on cancellation and, when
    /// `yield_to_pause` is set, on pause.
    async fn settle(&self, total: Duration, yield_to_pause: bool) -> Step<()> {
        let slice = self.ctx.config.timing.slice();
        let mut remaining = total;
        while !remaining.is_zero() {
            if yield_to_pause && self.is_paused() {
                break;
            }
            let step = remaining.min(slice);
            self.cancellable(tokio::time::sleep(step)).await?;
            remaining -= step;
        }
        if self.token.is_cancelled() {
            return Err(MissionOutcome::Cancelled);
        }
        Ok(())
    }

    fn scroll_settle(&self) -> Duration {
        let timing = &self.ctx.config.timing;
        let low = timing.scroll_settle_min_ms.min(timing.scroll_settle_max_ms);
        let high = timing.scroll_settle_max_ms.max(timing.scroll_settle_min_ms);
        TimingConfig::ms(rand::rng().random_range(low..=high))
    }

    async fn crawl(
        &mut self,
        page: PageId,
        collector: &Arc<Collector>,
        slot: &mut Option<Slot>,
    ) -> Step<()> {
        let driver = Arc::clone(&self.ctx.driver);
        let config = Arc::clone(&self.ctx.config);
        let label = self.label();

        let handler: Arc<dyn ResponseHandler> = Arc::clone(collector) as Arc<dyn ResponseHandler>;
        let markers = self.ctx.extractor.markers().to_vec();
        self.guard(driver.intercept_responses(page, &markers, handler))
            .await?;
        collector.activate();

        let target = self.target_url(page).await?;
        self.navigate(page, &target).await?;

        let content_wait = TimingConfig::ms(config.timing.content_wait_ms);
        if let Err(err) = self
            .cancellable(driver.wait_for_content(page, content_wait))
            .await?
        {
            engine_debug!("[{}] no feed items rendered yet: {}", label, err);
        }
        self.log(
            Severity::Success,
            format!("[{label}] feed loaded, collecting"),
        );
        self.settle(TimingConfig::ms(config.timing.initial_settle_ms), false)
            .await?;

        self.scroll(page, collector, slot).await
    }

    async fn target_url(&self, page: PageId) -> Step<String> {
        let base = self.ctx.config.site_base_url.trim_end_matches('/');
        match self.id.kind() {
            TaskKind::Profile(handle) => Ok(format!("{base}/{handle}/media")),
            TaskKind::Bookmarks => Ok(format!("{base}/i/bookmarks")),
            TaskKind::Likes => {
                let identity = self.likes_identity(page).await?;
                Ok(format!("{base}/{identity}/likes"))
            }
        }
    }

    /// Configured identity, else the cached one, else a one-time sniff.
    async fn likes_identity(&self, page: PageId) -> Step<String> {
        let configured = self
            .ctx
            .config
            .likes_identity
            .as_deref()
            .map(str::trim)
            .filter(|handle| !handle.is_empty());
        if let Some(handle) = configured {
            return Ok(handle.to_string());
        }
        let cached = lock(&self.ctx.identity).clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        self.log(Severity::Info, "Checking which account is signed in".to_string());
        let sniffed = self
            .cancellable(self.ctx.driver.resolve_identity(page))
            .await?;
        match sniffed {
            Ok(Some(handle)) if !handle.trim_matches('/').is_empty() => {
                let handle = handle.trim_matches('/').to_string();
                *lock(&self.ctx.identity) = Some(handle.clone());
                self.log(Severity::Success, format!("Signed in as @{handle}"));
                Ok(handle)
            }
            Ok(_) => Err(MissionOutcome::Failed(
                "could not identify the signed-in account".to_string(),
            )),
            Err(err) => Err(MissionOutcome::Failed(format!(
                "could not identify the signed-in account: {err}"
            ))),
        }
    }

    /// Up to [`NAV_ATTEMPTS`] tries; aborted navigations are retried, anything else fails.
    async fn navigate(&self, page: PageId, url: &str) -> Step<()> {
        let timeout = self.ctx.config.timeout();
        let retry_delay = TimingConfig::ms(self.ctx.config.timing.nav_retry_delay_ms);
        let label = self.label();

        for attempt in 1..=NAV_ATTEMPTS {
            let attempt_result = self
                .cancellable(tokio::time::timeout(
                    timeout,
                    self.ctx.driver.navigate(page, url, timeout),
                ))
                .await?;
            match attempt_result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) if err.is_transient() => {
                    self.log(
                        Severity::Warning,
                        format!(
                            "[{label}] navigation aborted ({attempt}/{NAV_ATTEMPTS}), retrying"
                        ),
                    );
                    self.settle(retry_delay, false).await?;
                }
                Ok(Err(err)) => {
                    return Err(MissionOutcome::Failed(format!("navigation failed: {err}")))
                }
                Err(_) => {
                    return Err(MissionOutcome::Failed(format!(
                        "navigation timed out after {}s",
                        timeout.as_secs()
                    )))
                }
            }
        }
        Err(MissionOutcome::Failed(format!(
            "navigation aborted {NAV_ATTEMPTS} times"
        )))
    }

    /// Releases the slot while paused and takes a fresh one before continuing.
    async fn checkpoint(&mut self, slot: &mut Option<Slot>) -> Step<()> {
        if self.token.is_cancelled() {
            return Err(MissionOutcome::Cancelled);
        }
        if !self.is_paused() {
            return Ok(());
        }

        if let Some(held) = slot.take() {
            held.release();
        }
        self.report(Msg::MissionSuspended {
            id: self.id.clone(),
            launch: self.launch,
        });

        if !wait_unpaused(&mut self.pauses, &self.id, &self.token).await {
            return Err(MissionOutcome::Cancelled);
        }
        self.log(
            Severity::Secondary,
            format!("Task [{}] waiting for a slot to resume", self.id),
        );
        let acquired = self
            .cancellable(self.ctx.slots.acquire())
            .await?
            .map_err(|_| MissionOutcome::Cancelled)?;
        *slot = Some(acquired);
        self.report(Msg::MissionResumed {
            id: self.id.clone(),
            launch: self.launch,
        });
        Ok(())
    }

    async fn scroll(
        &mut self,
        page: PageId,
        collector: &Collector,
        slot: &mut Option<Slot>,
    ) -> Step<()> {
        let driver = Arc::clone(&self.ctx.driver);
        let config = Arc::clone(&self.ctx.config);
        let timing = &config.timing;
        let label = self.label();
        let mut stalls: u64 = 0;
        let mut last_notice = 0;

        for _ in 0..config.max_scrolls {
            self.checkpoint(slot).await?;

            let streak = collector.streak();
            if !config.deep_scan && streak >= config.stop_thresh {
                self.log(
                    Severity::Success,
                    format!("[{label}] {streak} known items in a row, feed is caught up"),
                );
                return Ok(());
            }
            if config.deep_scan
                && streak > 0
                && streak % DEEP_SCAN_NOTICE_EVERY == 0
                && streak != last_notice
            {
                last_notice = streak;
                self.log(
                    Severity::Secondary,
                    format!("[{label}] deep scan running, {streak} known items skipped"),
                );
            }

            let before = self.guard(driver.document_height(page)).await?;
            self.guard(driver.scroll_to_end(page)).await?;
            self.settle(self.scroll_settle(), true).await?;
            let after = self.guard(driver.document_height(page)).await?;
            if after != before {
                stalls = 0;
                continue;
            }

            stalls += 1;
            for text in RATE_LIMIT_TEXTS {
                if self.guard(driver.page_contains_text(page, text)).await? {
                    self.log(
                        Severity::Danger,
                        format!("[{label}] rate limited, stopping to protect the account"),
                    );
                    return Err(MissionOutcome::Failed("rate limit detected".to_string()));
                }
            }
            if self.guard(driver.click_retry(page)).await? {
                self.log(
                    Severity::Warning,
                    format!("[{label}] retry button shown, clicked it"),
                );
                self.settle(TimingConfig::ms(timing.retry_click_settle_ms), false)
                    .await?;
                stalls = 0;
                continue;
            }
            if stalls < MAX_STALLS {
                self.log(
                    Severity::Warning,
                    format!("[{label}] page did not grow, nudging ({stalls})"),
                );
                self.guard(driver.scroll_by(page, -JIGGLE_PX)).await?;
                self.settle(TimingConfig::ms(timing.jiggle_pause_ms), false)
                    .await?;
                self.guard(driver.scroll_to_end(page)).await?;
                self.settle(TimingConfig::ms(timing.stall_backoff_ms * stalls), false)
                    .await?;
                continue;
            }

            self.log(
                Severity::Success,
                format!("[{label}] reached the end of the feed"),
            );
            return Ok(());
        }
        Ok(())
    }
}

/// Turns intercepted payloads into download jobs, skipping known media.
pub(crate) struct Collector {
    task: TaskId,
    label: String,
    dir: PathBuf,
    extractor: Arc<dyn Extractor>,
    downloads: DownloadManager,
    download_images: bool,
    download_videos: bool,
    known: Mutex<HashSet<String>>,
    streak: AtomicU64,
    active: AtomicBool,
}

impl Collector {
    fn new(
        ctx: &MissionContext,
        task: TaskId,
        label: String,
        dir: PathBuf,
        known: HashSet<String>,
    ) -> Self {
        Self {
            task,
            label,
            dir,
            extractor: Arc::clone(&ctx.extractor),
            downloads: ctx.downloads.clone(),
            download_images: ctx.config.download_images,
            download_videos: ctx.config.download_gifs,
            known: Mutex::new(known),
            streak: AtomicU64::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Consecutive already-known items seen this run.
    fn streak(&self) -> u64 {
        self.streak.load(Ordering::SeqCst)
    }

    fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn offer(&self, item: MediaItem) {
        let clean = clean_url(&item.url);
        let id = media_id(clean);
        let mut known = lock(&self.known);
        if known.contains(id) {
            self.streak.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.streak.store(0, Ordering::SeqCst);

        let wanted = match item.kind {
            MediaKind::Image => self.download_images,
            MediaKind::Video => self.download_videos,
        };
        if !wanted {
            return;
        }
        self.downloads.submit(DownloadJob {
            source_url: download_url(item.kind, clean),
            destination: media_destination(&self.dir, item.kind, id),
            owner: self.task.clone(),
            label: self.label.clone(),
            kind: item.kind,
            clean_url: clean.to_string(),
            origin_link: item.origin_link.clone(),
            retry_attempt: 0,
        });
        known.insert(id.to_string());
    }
}

impl ResponseHandler for Collector {
    fn on_response(&self, url: &str, body: &Value) {
        if !self.active.load(Ordering::SeqCst) || !self.extractor.matches(url) {
            return;
        }
        for item in self.extractor.extract(body) {
            self.offer(item);
        }
    }
}
