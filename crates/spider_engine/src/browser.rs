//! Seam to the browser automation layer.
//!
//! The engine never talks to a browser directly. Hosts plug in an
//! implementation of [`BrowserDriver`]; missions only see page handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use spider_core::{LaunchId, TaskId};
use thiserror::Error;

/// Opaque handle of one page in the shared browser context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Navigation was aborted by the page; worth retrying.
    #[error("navigation aborted: {0}")]
    Aborted(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("page closed")]
    PageClosed,
    #[error("browser context closed")]
    ContextClosed,
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Aborted(_))
    }
}

/// Receives intercepted JSON responses for a page.
pub trait ResponseHandler: Send + Sync {
    fn on_response(&self, url: &str, body: &Value);
}

#[async_trait::async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Opens the shared browser context.
    async fn launch(&self) -> Result<(), DriverError>;
    async fn shutdown(&self);
    /// Resolves once the browser context has closed, for whatever reason.
    async fn closed(&self);

    async fn open_page(&self) -> Result<PageId, DriverError>;
    async fn close_page(&self, page: PageId) -> Result<(), DriverError>;
    async fn is_page_open(&self, page: PageId) -> bool;
    async fn page_count(&self) -> usize;

    /// Routes JSON responses whose url contains one of `url_markers` to `handler`.
    async fn intercept_responses(
        &self,
        page: PageId,
        url_markers: &[String],
        handler: Arc<dyn ResponseHandler>,
    ) -> Result<(), DriverError>;
    async fn navigate(&self, page: PageId, url: &str, timeout: Duration)
        -> Result<(), DriverError>;
    /// Waits for feed items to render.
    async fn wait_for_content(&self, page: PageId, timeout: Duration) -> Result<(), DriverError>;
    async fn document_height(&self, page: PageId) -> Result<u64, DriverError>;
    async fn scroll_to_end(&self, page: PageId) -> Result<(), DriverError>;
    async fn scroll_by(&self, page: PageId, dy: i64) -> Result<(), DriverError>;
    async fn page_contains_text(&self, page: PageId, text: &str) -> Result<bool, DriverError>;
    /// Clicks a "Retry"/"Try again" button if one is shown. Returns whether one was clicked.
    async fn click_retry(&self, page: PageId) -> Result<bool, DriverError>;
    /// Handle of the signed-in account, read from the session's profile link.
    async fn resolve_identity(&self, page: PageId) -> Result<Option<String>, DriverError>;
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    page: PageId,
    launch: LaunchId,
}

/// Which page each task is using, so a relaunched task can pick its page back up.
/// Each entry belongs to the launch that claimed it last.
#[derive(Debug, Default)]
pub struct PageRegistry {
    pages: Mutex<HashMap<TaskId, Claim>>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the task's page if it is still open, else opens a new one.
    /// Either way `launch` becomes the page's owner. The flag is true when an
    /// existing page was reused.
    pub async fn claim(
        &self,
        id: &TaskId,
        launch: LaunchId,
        driver: &dyn BrowserDriver,
    ) -> Result<(PageId, bool), DriverError> {
        let existing = self.lock().get(id).copied();
        if let Some(claim) = existing {
            if driver.is_page_open(claim.page).await {
                self.lock().insert(id.clone(), Claim { page: claim.page, launch });
                return Ok((claim.page, true));
            }
            self.lock().remove(id);
        }

        let page = driver.open_page().await?;
        self.lock().insert(id.clone(), Claim { page, launch });
        Ok((page, false))
    }

    /// Drops the entry if `launch` still owns it. Returns false when a later
    /// launch has taken the page over, in which case the caller must not close it.
    pub fn release(&self, id: &TaskId, launch: LaunchId) -> bool {
        let mut pages = self.lock();
        match pages.get(id) {
            Some(claim) if claim.launch == launch => {
                pages.remove(id);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Page currently registered for the task.
    pub fn page_of(&self, id: &TaskId) -> Option<PageId> {
        self.lock().get(id).map(|claim| claim.page)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Claim>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
