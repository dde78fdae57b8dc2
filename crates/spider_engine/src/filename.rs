use std::path::{Path, PathBuf};

use crate::MediaKind;

/// Subfolder for images inside a task directory.
pub const IMAGES_DIR: &str = "Images";
/// Subfolder for videos inside a task directory.
pub const VIDEOS_DIR: &str = "Gif";

/// Canonical media url: everything before the first `?`.
pub fn clean_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

/// History identifier: the final path segment of the clean url without its extension.
pub fn media_id(clean_url: &str) -> &str {
    let name = clean_url.rsplit('/').next().unwrap_or(clean_url);
    match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    }
}

/// Url actually fetched for a media item.
pub fn download_url(kind: MediaKind, clean_url: &str) -> String {
    match kind {
        MediaKind::Image => format!("{clean_url}?format=jpg&name=orig"),
        MediaKind::Video => clean_url.to_string(),
    }
}

/// Where a media item lands inside its task directory.
pub fn media_destination(task_dir: &Path, kind: MediaKind, media_id: &str) -> PathBuf {
    match kind {
        MediaKind::Image => task_dir.join(IMAGES_DIR).join(format!("{media_id}.jpg")),
        MediaKind::Video => task_dir.join(VIDEOS_DIR).join(format!("{media_id}.mp4")),
    }
}
