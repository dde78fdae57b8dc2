use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine_logging::engine_info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Engine settings. Every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root under which per-task destination directories are created.
    pub save_path: PathBuf,
    /// Missions allowed to run at the same time.
    pub concurrency: usize,
    pub download_workers: usize,
    pub max_scrolls: u32,
    /// Consecutive already-downloaded items after which a feed counts as caught up.
    pub stop_thresh: u64,
    /// Video size cap in megabytes; 0 disables the cap.
    pub max_video_size_mb: f64,
    pub download_images: bool,
    /// Switch read by the download decision for videos.
    pub download_gifs: bool,
    /// Video switch exposed to command-line hosts. Kept distinct from
    /// `download_gifs`; a mismatch is reported when a mission starts.
    pub download_videos: bool,
    pub create_link_file: bool,
    /// Handle whose likes feed `MY_LIKES` crawls. Sniffed from the session when unset.
    pub likes_identity: Option<String>,
    /// Ignore the already-downloaded streak and scan every feed to the bottom.
    pub deep_scan: bool,
    pub headless: bool,
    /// Navigation and initial download request timeout.
    pub timeout_secs: u64,
    pub use_tmp_files: bool,
    pub site_base_url: String,
    /// Where the non-finished task list is kept between runs.
    pub task_file: PathBuf,
    pub timing: TimingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("Download"),
            concurrency: 3,
            download_workers: 12,
            max_scrolls: 1000,
            stop_thresh: 300,
            max_video_size_mb: 5.0,
            download_images: true,
            download_gifs: true,
            download_videos: true,
            create_link_file: true,
            likes_identity: None,
            deep_scan: false,
            headless: false,
            timeout_secs: 60,
            use_tmp_files: true,
            site_base_url: "https://x.com".to_string(),
            task_file: PathBuf::from("tasks.ron"),
            timing: TimingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads a RON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                engine_info!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        ron::from_str(&content).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Video size cap in bytes, `None` when unlimited.
    pub fn max_video_bytes(&self) -> Option<u64> {
        if self.max_video_size_mb > 0.0 {
            Some((self.max_video_size_mb * 1024.0 * 1024.0) as u64)
        } else {
            None
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn download_workers(&self) -> usize {
        self.download_workers.max(1)
    }
}

/// Delays used by missions, launchers and workers, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between browser launch and the first dispatch.
    pub warmup_ms: u64,
    /// Wait after the feed first loads.
    pub initial_settle_ms: u64,
    /// How long to wait for feed items after navigation.
    pub content_wait_ms: u64,
    /// Randomized wait after each scroll is drawn from this range.
    pub scroll_settle_min_ms: u64,
    pub scroll_settle_max_ms: u64,
    /// Waits are cut into slices of this length so pause and stop are noticed.
    pub slice_ms: u64,
    pub retry_click_settle_ms: u64,
    pub jiggle_pause_ms: u64,
    /// Extra wait per stalled scroll.
    pub stall_backoff_ms: u64,
    pub nav_retry_delay_ms: u64,
    pub drain_poll_ms: u64,
    pub queue_poll_ms: u64,
    pub rename_backoff_ms: u64,
    /// Upper bound on waiting for missions to close their pages at shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 3_000,
            initial_settle_ms: 5_000,
            content_wait_ms: 20_000,
            scroll_settle_min_ms: 5_000,
            scroll_settle_max_ms: 8_000,
            slice_ms: 1_000,
            retry_click_settle_ms: 5_000,
            jiggle_pause_ms: 3_000,
            stall_backoff_ms: 5_000,
            nav_retry_delay_ms: 2_000,
            drain_poll_ms: 2_000,
            queue_poll_ms: 1_000,
            rename_backoff_ms: 500,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl TimingConfig {
    pub(crate) fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    pub(crate) fn slice(&self) -> Duration {
        Self::ms(self.slice_ms.max(1))
    }
}
