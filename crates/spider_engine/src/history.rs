//! Per-destination ledger of media identifiers that were already downloaded.
//!
//! `history.txt` holds one identifier per line. When link recording is on,
//! `link.txt` pairs each identifier with the page it came from. Both files are
//! append-only; write failures are logged and swallowed.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_warn};
use spider_core::{profiles_dir, TaskKind};

use crate::filename::{IMAGES_DIR, VIDEOS_DIR};

pub const HISTORY_FILE: &str = "history.txt";
pub const LINK_FILE: &str = "link.txt";

/// Identifiers recorded for `dir`. A missing or unreadable file yields an empty set.
pub fn load(dir: &Path) -> HashSet<String> {
    match fs::read_to_string(dir.join(HISTORY_FILE)) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => HashSet::new(),
        Err(err) => {
            engine_warn!("Failed to read history in {:?}: {}", dir, err);
            HashSet::new()
        }
    }
}

/// Records one identifier, creating `dir` if needed.
pub fn append(dir: &Path, media_id: &str, origin_link: Option<&str>, record_links: bool) {
    if let Err(err) = try_append(dir, media_id, origin_link, record_links) {
        engine_warn!("Failed to record history for {} in {:?}: {}", media_id, dir, err);
    }
}

fn try_append(
    dir: &Path,
    media_id: &str,
    origin_link: Option<&str>,
    record_links: bool,
) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    append_line(&dir.join(HISTORY_FILE), media_id)?;
    if let (true, Some(link)) = (record_links, origin_link) {
        append_line(&dir.join(LINK_FILE), &format!("{link}\t{media_id}"))?;
    }
    Ok(())
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(format!("{line}\n").as_bytes())
}

/// Rebuilds `history.txt` from media file stems when the directory has media but no history.
///
/// Returns the number of identifiers written, or `None` when nothing was rebuilt.
pub fn recover_from_media(dir: &Path) -> Option<usize> {
    if !dir.is_dir() || dir.join(HISTORY_FILE).exists() {
        return None;
    }

    let mut ids: Vec<String> = Vec::new();
    for sub in [IMAGES_DIR, VIDEOS_DIR] {
        let Ok(entries) = fs::read_dir(dir.join(sub)) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if !ids.iter().any(|known| known == stem) {
                    ids.push(stem.to_string());
                }
            }
        }
    }
    if ids.is_empty() {
        return None;
    }

    ids.sort();
    let mut content = ids.join("\n");
    content.push('\n');
    match fs::write(dir.join(HISTORY_FILE), content) {
        Ok(()) => Some(ids.len()),
        Err(err) => {
            engine_warn!("Failed to rebuild history in {:?}: {}", dir, err);
            None
        }
    }
}

/// Number of recorded identifiers for `dir`.
pub fn count(dir: &Path) -> usize {
    load(dir).len()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStat {
    pub label: String,
    pub dir: PathBuf,
    pub entries: usize,
}

/// History sizes for likes, bookmarks and every profile under `save_root`.
///
/// Directories without a history file are skipped. Profiles are sorted by name.
pub fn stats(save_root: &Path) -> Vec<HistoryStat> {
    let mut result = Vec::new();
    for kind in [TaskKind::Likes, TaskKind::Bookmarks] {
        push_stat(&mut result, kind.label(), kind.destination_dir(save_root));
    }

    let mut profiles: Vec<(String, PathBuf)> = match fs::read_dir(profiles_dir(save_root)) {
        Ok(entries) => entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect(),
        Err(err) => {
            engine_debug!("No profile directories under {:?}: {}", save_root, err);
            Vec::new()
        }
    };
    profiles.sort();
    for (name, dir) in profiles {
        push_stat(&mut result, name, dir);
    }
    result
}

fn push_stat(result: &mut Vec<HistoryStat>, label: String, dir: PathBuf) {
    if dir.join(HISTORY_FILE).is_file() {
        let entries = count(&dir);
        result.push(HistoryStat {
            label,
            dir,
            entries,
        });
    }
}
