//! Spider engine: browser missions, media downloads and the scheduler runtime.
mod browser;
mod config;
mod download;
mod engine;
mod events;
mod extract;
mod fetch;
mod filename;
pub mod history;
mod launcher;
mod mission;
mod persist;
mod scheduler;
mod slots;
mod task_store;
mod types;

pub use browser::{BrowserDriver, DriverError, PageId, PageRegistry, ResponseHandler};
pub use config::{ConfigError, EngineConfig, TimingConfig};
pub use download::{
    DownloadManager, DownloadSettings, CHUNK_SIZE, COMPLETE_FILE_THRESHOLD, MAX_RETRIES,
};
pub use engine::EngineHandle;
pub use extract::{Extractor, MediaItem, TimelineExtractor, DEFAULT_URL_MARKERS};
pub use fetch::{
    ByteStream, ChannelProgressSink, FetchSettings, MediaFetcher, ProgressSink, ReqwestFetcher,
};
pub use filename::{
    clean_url, download_url, media_destination, media_id, IMAGES_DIR, VIDEOS_DIR,
};
pub use persist::{
    ensure_output_dir, partial_path, replace_with_retry, AtomicFileWriter, PersistError,
};
pub use slots::{Slot, SlotPool};
pub use task_store::TaskStore;
pub use types::{DownloadJob, EngineEvent, FailureKind, FetchError, MediaKind};
