use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::stats::{numeric_summary, NumericSummary};
use super::ToolError;

/// Metric fields a caller may ask for by name. Duration is handled specially
/// (ISO-8601 string parsed into seconds); everything else is a direct count.
pub const METRIC_FIELDS: &[&str] = &[
    "view_count",
    "like_count",
    "comment_count",
    "duration_seconds",
];

/// One video of a downloaded channel. The shape matches the channel-data
/// producer's JSON contract; unknown extra fields are ignored on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// ISO-8601 duration string, e.g. "PT4M13S".
    #[serde(default)]
    pub duration: String,
    /// ISO-8601 timestamp string.
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub transcript: String,
}

impl Video {
    /// Resolve a metric field on this video. Unknown fields yield `None`.
    pub fn metric_value(&self, field: &str) -> Option<f64> {
        match field.trim().to_lowercase().as_str() {
            "view_count" | "views" => Some(self.view_count as f64),
            "like_count" | "likes" => Some(self.like_count as f64),
            "comment_count" | "comments" => Some(self.comment_count as f64),
            "duration" | "duration_seconds" => parse_iso8601_duration(&self.duration),
            _ => None,
        }
    }

    /// Canonical CDN thumbnail derived from the video id; falls back to the
    /// stored URL when the id is absent.
    pub fn display_thumbnail(&self) -> String {
        if self.video_id.trim().is_empty() {
            self.thumbnail_url.clone()
        } else {
            format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", self.video_id)
        }
    }
}

/// A downloaded channel dataset: the external producer's JSON document,
/// treated as immutable once attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelData {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_url: String,
    #[serde(default)]
    pub videos: Vec<Video>,
    #[serde(default)]
    pub downloaded_at: String,
}

impl ChannelData {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow::anyhow!("Invalid channel JSON: {err}"))
    }
}

/// Parse an ISO-8601 duration of the "PT#H#M#S" family into total seconds.
/// Absent groups count as zero; anything unparseable is `None` and excluded
/// from statistics.
pub fn parse_iso8601_duration(raw: &str) -> Option<f64> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?$").expect("valid pattern")
    });

    let caps = pattern.captures(raw.trim())?;
    let hours: f64 = caps.get(1).map_or(0.0, |m| m.as_str().parse().unwrap_or(0.0));
    let minutes: f64 = caps.get(2).map_or(0.0, |m| m.as_str().parse().unwrap_or(0.0));
    let seconds: f64 = caps.get(3).map_or(0.0, |m| m.as_str().parse().unwrap_or(0.0));

    // "PT" alone matches the pattern but carries no information.
    caps.get(1).or(caps.get(2)).or(caps.get(3))?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// A `{date, value}` pair of a metric-over-time series, chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub date: String,
    pub value: f64,
}

/// Extract the time series for one metric field. Pairs with a missing date or
/// a non-numeric value are dropped; zero surviving pairs is an error listing
/// the fields a caller can ask for.
pub fn metric_series(videos: &[Video], field: &str) -> Result<Vec<MetricPoint>, ToolError> {
    let mut points: Vec<MetricPoint> = videos
        .iter()
        .filter(|video| !video.published_at.trim().is_empty())
        .filter_map(|video| {
            video.metric_value(field).map(|value| MetricPoint {
                date: video.published_at.clone(),
                value,
            })
        })
        .collect();

    if points.is_empty() {
        return Err(no_metric_data(field));
    }

    // ISO-8601 timestamps sort chronologically as strings.
    points.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(points)
}

/// Descriptive statistics over one metric field across all videos.
pub fn field_stats(videos: &[Video], field: &str) -> Result<NumericSummary, ToolError> {
    let values: Vec<f64> = videos
        .iter()
        .filter_map(|video| video.metric_value(field))
        .collect();

    numeric_summary(values).ok_or_else(|| no_metric_data(field))
}

fn no_metric_data(field: &str) -> ToolError {
    ToolError::new(format!(
        "No numeric values found for field '{}'. Available fields: {}",
        field,
        METRIC_FIELDS.join(", ")
    ))
}

const ORDINALS: &[(&str, usize)] = &[
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
    ("1st", 1),
    ("2nd", 2),
    ("3rd", 3),
    ("4th", 4),
    ("5th", 5),
];

/// Resolve a free-text selector to one video. Resolution order: literal
/// "first"/"1", named ordinals, "video N", a bare 1-indexed integer,
/// "last"/"most recent", "most viewed"/"least viewed", then a
/// case-insensitive title substring match.
pub fn select_video<'a>(videos: &'a [Video], selector: &str) -> Result<&'a Video, ToolError> {
    if videos.is_empty() {
        return Err(ToolError::new("No videos are loaded."));
    }

    let raw = selector.trim();
    let lower = raw.to_lowercase();

    if lower == "first" || lower == "1" {
        return Ok(&videos[0]);
    }

    if let Some((_, index)) = ORDINALS.iter().find(|(word, _)| lower == *word) {
        return by_index(videos, *index, selector);
    }

    if let Some(tail) = lower.strip_prefix("video ") {
        if let Ok(index) = tail.trim().parse::<usize>() {
            return by_index(videos, index, selector);
        }
    }

    if let Ok(index) = lower.parse::<usize>() {
        return by_index(videos, index, selector);
    }

    if lower == "last" || lower.contains("most recent") {
        return Ok(videos.last().expect("non-empty checked above"));
    }

    if lower.contains("most viewed") || lower.contains("least viewed") {
        let mut ranked: Vec<&Video> = videos.iter().collect();
        ranked.sort_by(|a, b| b.view_count.cmp(&a.view_count));
        if lower.contains("least viewed") {
            ranked.reverse();
        }
        return Ok(ranked[0]);
    }

    videos
        .iter()
        .find(|video| video.title.to_lowercase().contains(&lower))
        .ok_or_else(|| {
            ToolError::new(format!(
                "No video matched selector '{raw}'. Try an index (1-{}), 'most viewed', or part of a title.",
                videos.len()
            ))
        })
}

fn by_index<'a>(videos: &'a [Video], index: usize, selector: &str) -> Result<&'a Video, ToolError> {
    if index == 0 || index > videos.len() {
        return Err(ToolError::new(format!(
            "Selector '{selector}' is out of range; the channel has {} videos.",
            videos.len()
        )));
    }
    Ok(&videos[index - 1])
}
