use serde_json::{Map, Value};

use crate::MediaKind;

/// Url fragments of the timeline API responses worth inspecting.
pub const DEFAULT_URL_MARKERS: [&str; 5] =
    ["UserMedia", "UserTweets", "Bookmarks", "Likes", "Timeline"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
    /// Status page the media was posted on, when it could be derived.
    pub origin_link: Option<String>,
}

pub trait Extractor: Send + Sync {
    /// Url fragments of responses worth inspecting.
    fn markers(&self) -> &[String];

    /// True when a response from `url` may carry media.
    fn matches(&self, url: &str) -> bool {
        self.markers().iter().any(|marker| url.contains(marker.as_str()))
    }

    fn extract(&self, body: &Value) -> Vec<MediaItem>;
}

/// Walks timeline payloads down to post nodes and collects their media.
///
/// - a post node is an object with `itemContent` or `tweet_results`
/// - images are `media_url_https` values under `/media/`, profile images excluded
/// - videos contribute their highest-bitrate `video/mp4` variant, first one on ties
/// - anything that does not fit the shape is skipped
#[derive(Debug, Clone)]
pub struct TimelineExtractor {
    markers: Vec<String>,
    site_base_url: String,
}

impl TimelineExtractor {
    pub fn new(markers: Vec<String>, site_base_url: impl Into<String>) -> Self {
        Self {
            markers,
            site_base_url: site_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_default_markers(site_base_url: impl Into<String>) -> Self {
        Self::new(
            DEFAULT_URL_MARKERS.iter().map(|m| m.to_string()).collect(),
            site_base_url,
        )
    }

    fn visit(&self, value: &Value, out: &mut Vec<MediaItem>) {
        match value {
            Value::Object(map) => {
                if map.contains_key("itemContent") || map.contains_key("tweet_results") {
                    let link = self.origin_link(map);
                    collect_media(value, link.as_deref(), out);
                } else {
                    for child in map.values() {
                        self.visit(child, out);
                    }
                }
            }
            Value::Array(items) => {
                for child in items {
                    self.visit(child, out);
                }
            }
            _ => {}
        }
    }

    fn origin_link(&self, node: &Map<String, Value>) -> Option<String> {
        let content = match node.get("itemContent") {
            Some(inner) => inner.as_object()?,
            None => node,
        };
        let result = content.get("tweet_results")?.get("result")?;
        let legacy = field_or_nested(result, "legacy")?;
        let id = legacy.get("id_str")?.as_str().filter(|id| !id.is_empty())?;
        let screen_name = field_or_nested(result, "core")
            .and_then(|core| core.pointer("/user_results/result/legacy/screen_name"))
            .and_then(Value::as_str)
            .unwrap_or("i");
        Some(format!("{}/{screen_name}/status/{id}", self.site_base_url))
    }
}

impl Extractor for TimelineExtractor {
    fn markers(&self) -> &[String] {
        &self.markers
    }

    fn extract(&self, body: &Value) -> Vec<MediaItem> {
        let mut out = Vec::new();
        self.visit(body, &mut out);
        out
    }
}

/// `result.<key>`, falling back to `result.tweet.<key>` when the first is absent or empty.
fn field_or_nested<'a>(result: &'a Value, key: &str) -> Option<&'a Value> {
    let present = |value: &&Value| !is_empty(value);
    result
        .get(key)
        .filter(present)
        .or_else(|| result.get("tweet")?.get(key).filter(present))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn collect_media(value: &Value, link: Option<&str>, out: &mut Vec<MediaItem>) {
    match value {
        Value::Object(map) => {
            if let Some(url) = map.get("media_url_https").and_then(Value::as_str) {
                if url.contains("/media/") && !url.contains("profile_images") {
                    out.push(MediaItem {
                        kind: MediaKind::Image,
                        url: url.to_string(),
                        origin_link: link.map(str::to_string),
                    });
                }
            }
            if let Some(url) = best_mp4(map) {
                out.push(MediaItem {
                    kind: MediaKind::Video,
                    url: url.to_string(),
                    origin_link: link.map(str::to_string),
                });
            }
            for child in map.values() {
                collect_media(child, link, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_media(child, link, out);
            }
        }
        _ => {}
    }
}

fn best_mp4(node: &Map<String, Value>) -> Option<&str> {
    let variants = node.get("video_info")?.get("variants")?.as_array()?;
    let mut best: Option<(u64, &str)> = None;
    for variant in variants {
        if variant.get("content_type").and_then(Value::as_str) != Some("video/mp4") {
            continue;
        }
        let Some(url) = variant.get("url").and_then(Value::as_str) else {
            continue;
        };
        let bitrate = variant.get("bitrate").and_then(Value::as_u64).unwrap_or(0);
        if best.map_or(true, |(top, _)| bitrate > top) {
            best = Some((bitrate, url));
        }
    }
    best.map(|(_, url)| url)
}
