#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{json, Value};
use spider_core::{StatusEntry, TaskId, TaskStatus};
use spider_engine::{
    BrowserDriver, ByteStream, DriverError, EngineConfig, EngineEvent, EngineHandle, FailureKind,
    FetchError, MediaFetcher, PageId, ProgressSink, ResponseHandler, TimingConfig,
};
use tokio_util::sync::CancellationToken;

pub const API_URL: &str = "https://x.com/i/api/graphql/q/UserMedia?variables=%7B%7D";
pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_logging() {
    engine_logging::initialize_for_tests();
}

/// Polls `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

pub async fn eventually_async(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Delays short enough for tests.
pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        warmup_ms: 0,
        initial_settle_ms: 0,
        content_wait_ms: 10,
        scroll_settle_min_ms: 5,
        scroll_settle_max_ms: 5,
        slice_ms: 5,
        retry_click_settle_ms: 5,
        jiggle_pause_ms: 5,
        stall_backoff_ms: 1,
        nav_retry_delay_ms: 5,
        drain_poll_ms: 10,
        queue_poll_ms: 10,
        rename_backoff_ms: 5,
        shutdown_grace_ms: 1_000,
    }
}

pub fn test_config(root: &Path) -> EngineConfig {
    EngineConfig {
        save_path: root.join("Download"),
        task_file: root.join("tasks.ron"),
        timing: fast_timing(),
        ..EngineConfig::default()
    }
}

/// Timeline payload with one post per image id.
pub fn image_payload(ids: &[&str]) -> Value {
    let entries: Vec<Value> = ids
        .iter()
        .enumerate()
        .map(|(n, id)| {
            json!({
                "itemContent": { "tweet_results": { "result": {
                    "core": { "user_results": { "result": { "legacy": { "screen_name": "poster" } } } },
                    "legacy": {
                        "id_str": format!("{}", 1000 + n),
                        "extended_entities": { "media": [
                            { "media_url_https": format!("https://pbs.twimg.com/media/{id}.jpg") }
                        ]}
                    }
                }}}
            })
        })
        .collect();
    json!({ "data": { "timeline": { "entries": entries } } })
}

pub fn image_download_url(id: &str) -> String {
    format!("https://pbs.twimg.com/media/{id}.jpg?format=jpg&name=orig")
}

#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Clone)]
pub struct Route {
    pub body: Vec<u8>,
    /// Size announced by HEAD; defaults to the body length.
    pub announced: Option<u64>,
    /// Number of opens that fail before one succeeds.
    pub failures: usize,
    pub chunk: usize,
    pub chunk_delay: Duration,
    /// Connection goes silent after the first chunk.
    pub stall: bool,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            announced: None,
            failures: 0,
            chunk: 4096,
            chunk_delay: Duration::ZERO,
            stall: false,
        }
    }
}

/// In-memory media server.
#[derive(Default)]
pub struct FakeFetcher {
    routes: Mutex<HashMap<String, Route>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, url: impl Into<String>, route: Route) {
        self.routes.lock().unwrap().insert(url.into(), route);
    }

    pub fn opens(&self, url: &str) -> usize {
        self.opens.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl MediaFetcher for FakeFetcher {
    async fn probe_size(&self, url: &str) -> Result<Option<u64>, FetchError> {
        let routes = self.routes.lock().unwrap();
        match routes.get(url) {
            Some(route) => Ok(Some(route.announced.unwrap_or(route.body.len() as u64))),
            None => Err(FetchError::new(FailureKind::HttpStatus(404), "not found")),
        }
    }

    async fn open(&self, url: &str) -> Result<ByteStream, FetchError> {
        let attempt = {
            let mut opens = self.opens.lock().unwrap();
            let count = opens.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let route = self.routes.lock().unwrap().get(url).cloned();
        let Some(route) = route else {
            return Err(FetchError::new(FailureKind::HttpStatus(404), "not found"));
        };
        if attempt <= route.failures {
            return Err(FetchError::new(FailureKind::Network, "connection reset"));
        }

        let delay = route.chunk_delay;
        let chunks: Vec<Bytes> = route
            .body
            .chunks(route.chunk.max(1))
            .map(Bytes::copy_from_slice)
            .collect();
        let stream = futures_util::stream::iter(chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<Bytes, FetchError>(chunk)
        });
        if route.stall {
            return Ok(Box::pin(stream.take(1).chain(futures_util::stream::pending())));
        }
        Ok(Box::pin(stream))
    }
}

/// Scripted feed behind one page url.
#[derive(Clone, Default)]
pub struct Feed {
    /// Delivered when the page is navigated to.
    pub initial: Option<Value>,
    /// One payload per scroll; the page grows while any are left.
    pub batches: VecDeque<Value>,
    /// Page keeps growing on every scroll even without payloads.
    pub endless: bool,
    pub rate_limited: bool,
}

#[derive(Default)]
struct DriverState {
    launch_error: Option<DriverError>,
    next_page: u64,
    open: HashSet<PageId>,
    urls: HashMap<PageId, String>,
    heights: HashMap<PageId, u64>,
    handlers: HashMap<PageId, Arc<dyn ResponseHandler>>,
    feeds: HashMap<String, Feed>,
    navigations: Vec<String>,
    scrolls: HashMap<String, usize>,
    identity: Option<String>,
    identity_calls: usize,
    shutdowns: usize,
}

/// Browser stand-in driven by per-url [`Feed`]s.
pub struct FakeDriver {
    state: Mutex<DriverState>,
    closed: CancellationToken,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DriverState::default()),
            closed: CancellationToken::new(),
        })
    }

    pub fn feed(&self, url: impl Into<String>, feed: Feed) {
        self.state.lock().unwrap().feeds.insert(url.into(), feed);
    }

    pub fn fail_launch(&self, error: DriverError) {
        self.state.lock().unwrap().launch_error = Some(error);
    }

    pub fn set_identity(&self, identity: Option<&str>) {
        self.state.lock().unwrap().identity = identity.map(str::to_string);
    }

    pub fn identity_calls(&self) -> usize {
        self.state.lock().unwrap().identity_calls
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn scrolls(&self, url: &str) -> usize {
        self.state.lock().unwrap().scrolls.get(url).copied().unwrap_or(0)
    }

    pub fn open_pages(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    pub fn shutdowns(&self) -> usize {
        self.state.lock().unwrap().shutdowns
    }

    /// Simulates the user closing the browser.
    pub fn close_context(&self) {
        self.closed.cancel();
    }

    /// Hands `payload` to the page currently showing `url`. False if no such page.
    pub fn deliver(&self, url: &str, payload: &Value) -> bool {
        let handler = {
            let state = self.state.lock().unwrap();
            state
                .urls
                .iter()
                .find(|(page, shown)| shown.as_str() == url && state.open.contains(*page))
                .and_then(|(page, _)| state.handlers.get(page).cloned())
        };
        match handler {
            Some(handler) => {
                handler.on_response(API_URL, payload);
                true
            }
            None => false,
        }
    }

    fn deliver_to(&self, page: PageId, payload: Option<Value>) {
        let Some(payload) = payload else {
            return;
        };
        let handler = self.state.lock().unwrap().handlers.get(&page).cloned();
        if let Some(handler) = handler {
            handler.on_response(API_URL, &payload);
        }
    }

    fn check_open(state: &DriverState, page: PageId) -> Result<(), DriverError> {
        if state.open.contains(&page) {
            Ok(())
        } else {
            Err(DriverError::PageClosed)
        }
    }
}

#[async_trait::async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self) -> Result<(), DriverError> {
        match self.state.lock().unwrap().launch_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdowns += 1;
        state.open.clear();
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    async fn open_page(&self) -> Result<PageId, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.next_page += 1;
        let page = PageId(state.next_page);
        state.open.insert(page);
        state.heights.insert(page, 1000);
        Ok(page)
    }

    async fn close_page(&self, page: PageId) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        state.handlers.remove(&page);
        if state.open.remove(&page) {
            Ok(())
        } else {
            Err(DriverError::PageClosed)
        }
    }

    async fn is_page_open(&self, page: PageId) -> bool {
        self.state.lock().unwrap().open.contains(&page)
    }

    async fn page_count(&self) -> usize {
        self.state.lock().unwrap().open.len()
    }

    async fn intercept_responses(
        &self,
        page: PageId,
        _url_markers: &[String],
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&state, page)?;
        state.handlers.insert(page, handler);
        Ok(())
    }

    async fn navigate(&self, page: PageId, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        let initial = {
            let mut state = self.state.lock().unwrap();
            Self::check_open(&state, page)?;
            state.navigations.push(url.to_string());
            state.urls.insert(page, url.to_string());
            state.feeds.get(url).and_then(|feed| feed.initial.clone())
        };
        self.deliver_to(page, initial);
        Ok(())
    }

    async fn wait_for_content(&self, page: PageId, _timeout: Duration) -> Result<(), DriverError> {
        Self::check_open(&self.state.lock().unwrap(), page)
    }

    async fn document_height(&self, page: PageId) -> Result<u64, DriverError> {
        let state = self.state.lock().unwrap();
        Self::check_open(&state, page)?;
        Ok(state.heights.get(&page).copied().unwrap_or(0))
    }

    async fn scroll_to_end(&self, page: PageId) -> Result<(), DriverError> {
        let payload = {
            let mut state = self.state.lock().unwrap();
            Self::check_open(&state, page)?;
            let url = state.urls.get(&page).cloned().unwrap_or_default();
            *state.scrolls.entry(url.clone()).or_insert(0) += 1;
            let (payload, grows) = match state.feeds.get_mut(&url) {
                Some(feed) => {
                    let next = feed.batches.pop_front();
                    let grows = next.is_some() || feed.endless;
                    (next, grows)
                }
                None => (None, false),
            };
            if grows {
                *state.heights.entry(page).or_insert(0) += 1000;
            }
            payload
        };
        self.deliver_to(page, payload);
        Ok(())
    }

    async fn scroll_by(&self, page: PageId, _dy: i64) -> Result<(), DriverError> {
        Self::check_open(&self.state.lock().unwrap(), page)
    }

    async fn page_contains_text(&self, page: PageId, text: &str) -> Result<bool, DriverError> {
        let state = self.state.lock().unwrap();
        Self::check_open(&state, page)?;
        let limited = state
            .urls
            .get(&page)
            .and_then(|url| state.feeds.get(url))
            .map_or(false, |feed| feed.rate_limited);
        Ok(limited && text == "Rate limit exceeded")
    }

    async fn click_retry(&self, page: PageId) -> Result<bool, DriverError> {
        Self::check_open(&self.state.lock().unwrap(), page)?;
        Ok(false)
    }

    async fn resolve_identity(&self, page: PageId) -> Result<Option<String>, DriverError> {
        let mut state = self.state.lock().unwrap();
        Self::check_open(&state, page)?;
        state.identity_calls += 1;
        Ok(state.identity.clone())
    }
}

/// Engine handle plus every event it has published so far.
pub struct Harness {
    pub handle: EngineHandle,
    pub events: Vec<EngineEvent>,
    pub save_path: PathBuf,
}

impl Harness {
    pub fn new(config: EngineConfig, driver: Arc<FakeDriver>, fetcher: Arc<FakeFetcher>) -> Self {
        init_logging();
        let save_path = config.save_path.clone();
        Self {
            handle: EngineHandle::new(config, driver, fetcher),
            events: Vec::new(),
            save_path,
        }
    }

    pub fn pump(&mut self) {
        while let Some(event) = self.handle.try_recv() {
            self.events.push(event);
        }
    }

    /// Waits until `check` holds for the collected events.
    pub fn wait_for_event(&mut self, mut check: impl FnMut(&EngineEvent) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        loop {
            self.pump();
            if self.events.iter().any(&mut check) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn wait_finished(&mut self, id: &str) -> bool {
        let id = TaskId::new(id);
        self.wait_for_event(|event| matches!(event, EngineEvent::TaskFinished(done) if *done == id))
    }

    pub fn status_of(&self, id: &str) -> Option<StatusEntry> {
        let id = TaskId::new(id);
        self.handle
            .status_snapshot()
            .into_iter()
            .find(|entry| entry.id == id)
    }

    pub fn wait_status(&self, id: &str, status: TaskStatus) -> bool {
        eventually(WAIT, || {
            self.status_of(id).map(|entry| entry.status) == Some(status)
        })
    }

    pub fn logged(&mut self, fragment: &str) -> bool {
        self.pump();
        self.events.iter().any(|event| {
            matches!(event, EngineEvent::Log { message, .. } if message.contains(fragment))
        })
    }
}
