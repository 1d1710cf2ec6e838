use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use crate::dataset::channel::{field_stats, metric_series, select_video, Video};
use crate::dataset::ToolError;
use crate::image_gen::{ImageAttachment, SharedImageDelegate};

use super::{require_str, ChartPayload, ToolDeclaration, ToolOutcome, Toolset};

// Protocol-fixed tool names.
pub const GENERATE_IMAGE: &str = "generateImage";
pub const PLOT_METRIC_VS_TIME: &str = "plot_metric_vs_time";
pub const PLAY_VIDEO: &str = "play_video";
pub const COMPUTE_STATS_JSON: &str = "compute_stats_json";

/// Tools over the currently attached channel dataset. `generateImage` is
/// exempt from the loaded-data guard; the other three require videos.
pub struct VideoToolset<'a> {
    videos: &'a [Video],
    image_delegate: Option<SharedImageDelegate>,
    anchor_image: Option<&'a ImageAttachment>,
}

impl<'a> VideoToolset<'a> {
    pub fn new(videos: &'a [Video]) -> Self {
        Self {
            videos,
            image_delegate: None,
            anchor_image: None,
        }
    }

    pub fn with_image_delegate(mut self, delegate: SharedImageDelegate) -> Self {
        self.image_delegate = Some(delegate);
        self
    }

    pub fn with_anchor_image(mut self, anchor: Option<&'a ImageAttachment>) -> Self {
        self.anchor_image = anchor;
        self
    }

    fn guard_loaded(&self) -> Option<ToolOutcome> {
        if self.videos.is_empty() {
            Some(ToolOutcome::error(ToolError::new(
                "No channel data is loaded. Ask the user to attach a channel first.",
            )))
        } else {
            None
        }
    }

    async fn generate_image(&self, args: &Value) -> ToolOutcome {
        let prompt = match require_str(args, "prompt") {
            Ok(value) => value,
            Err(err) => return ToolOutcome::error(err),
        };
        let use_anchor = args
            .get("use_anchor")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let Some(delegate) = self.image_delegate.as_ref() else {
            return ToolOutcome::error(ToolError::new(
                "Image generation is not configured for this session.",
            ));
        };

        let anchor = if use_anchor { self.anchor_image } else { None };
        match delegate.generate(prompt, anchor).await {
            Ok(image) => {
                let chart = ChartPayload::GeneratedImage {
                    image_data: image.image_data.clone(),
                    mime_type: image.mime_type.clone(),
                    prompt: image.prompt.clone(),
                };
                let result = serde_json::to_value(&chart).unwrap_or_else(|_| json!({}));
                ToolOutcome::with_chart(result, chart)
            }
            Err(failure) => ToolOutcome::error(ToolError::new(failure.to_string())),
        }
    }

    fn plot_metric(&self, args: &Value) -> ToolOutcome {
        let field = match require_str(args, "metric_field") {
            Ok(value) => value,
            Err(err) => return ToolOutcome::error(err),
        };

        match metric_series(self.videos, field) {
            Ok(points) => {
                let chart = ChartPayload::MetricVsTimeChart {
                    metric: field.to_string(),
                    points,
                };
                let result = serde_json::to_value(&chart).unwrap_or_else(|_| json!({}));
                ToolOutcome::with_chart(result, chart)
            }
            Err(err) => ToolOutcome::error(err),
        }
    }

    fn play(&self, args: &Value) -> ToolOutcome {
        let selector = match require_str(args, "selector") {
            Ok(value) => value,
            Err(err) => return ToolOutcome::error(err),
        };

        match select_video(self.videos, selector) {
            Ok(video) => {
                let chart = ChartPayload::PlayVideoCard {
                    video_id: video.video_id.clone(),
                    title: video.title.clone(),
                    thumbnail_url: video.display_thumbnail(),
                    video_url: video.video_url.clone(),
                    published_at: video.published_at.clone(),
                    view_count: video.view_count,
                };
                let result = serde_json::to_value(&chart).unwrap_or_else(|_| json!({}));
                ToolOutcome::with_chart(result, chart)
            }
            Err(err) => ToolOutcome::error(err),
        }
    }

    fn stats(&self, args: &Value) -> ToolOutcome {
        let field = match require_str(args, "field") {
            Ok(value) => value,
            Err(err) => return ToolOutcome::error(err),
        };

        match field_stats(self.videos, field) {
            Ok(summary) => {
                let mut result = serde_json::to_value(&summary).unwrap_or_else(|_| json!({}));
                if let Some(map) = result.as_object_mut() {
                    map.insert("field".to_string(), json!(field));
                }
                ToolOutcome::ok(result)
            }
            Err(err) => ToolOutcome::error(err),
        }
    }
}

#[async_trait]
impl Toolset for VideoToolset<'_> {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        vec![
            ToolDeclaration::new(
                GENERATE_IMAGE,
                "Generate an image from a text prompt. Set use_anchor to true only when the user asks to restyle their attached image.",
                json!({
                    "type": "object",
                    "properties": {
                        "prompt": {
                            "type": "string",
                            "description": "What to draw, in plain language"
                        },
                        "use_anchor": {
                            "type": "boolean",
                            "description": "Base the image on the user's attached image (default false)"
                        }
                    },
                    "required": ["prompt"]
                }),
            ),
            ToolDeclaration::new(
                PLOT_METRIC_VS_TIME,
                "Plot one metric of the loaded channel over publish time. Valid fields: view_count, like_count, comment_count, duration_seconds.",
                json!({
                    "type": "object",
                    "properties": {
                        "metric_field": {
                            "type": "string",
                            "description": "Which metric to plot against publish date"
                        }
                    },
                    "required": ["metric_field"]
                }),
            ),
            ToolDeclaration::new(
                PLAY_VIDEO,
                "Show a playable card for one video. The selector may be an index ('2', 'video 3'), an ordinal ('first'), 'last', 'most viewed', 'least viewed', or part of a title.",
                json!({
                    "type": "object",
                    "properties": {
                        "selector": {
                            "type": "string",
                            "description": "Which video to play"
                        }
                    },
                    "required": ["selector"]
                }),
            ),
            ToolDeclaration::new(
                COMPUTE_STATS_JSON,
                "Compute count, mean, median, std, min and max for one numeric field across all loaded videos.",
                json!({
                    "type": "object",
                    "properties": {
                        "field": {
                            "type": "string",
                            "description": "Metric field, e.g. view_count or duration_seconds"
                        }
                    },
                    "required": ["field"]
                }),
            ),
        ]
    }

    #[instrument(skip_all, fields(tool = name))]
    async fn execute(&self, name: &str, args: &Value) -> ToolOutcome {
        // generateImage works without any channel loaded; everything else
        // needs videos.
        if name != GENERATE_IMAGE {
            if let Some(guard) = self.guard_loaded() {
                return guard;
            }
        }

        match name {
            GENERATE_IMAGE => self.generate_image(args).await,
            PLOT_METRIC_VS_TIME => self.plot_metric(args),
            PLAY_VIDEO => self.play(args),
            COMPUTE_STATS_JSON => self.stats(args),
            other => ToolOutcome::error(ToolError::new(format!("Unknown tool '{other}'."))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::image_gen::MockImageDelegate;

    fn videos() -> Vec<Video> {
        let mut videos = Vec::new();
        for (idx, (title, views, duration)) in [
            ("Alpha", 10, "PT4M13S"),
            ("Beta", 30, "PT1H"),
            ("Gamma", 20, "unknowable"),
        ]
        .iter()
        .enumerate()
        {
            videos.push(Video {
                video_id: format!("vid{idx}"),
                title: title.to_string(),
                description: String::new(),
                duration: duration.to_string(),
                published_at: format!("2024-0{}-01T00:00:00Z", idx + 1),
                view_count: *views,
                like_count: 0,
                comment_count: 0,
                thumbnail_url: String::new(),
                video_url: format!("https://youtube.com/watch?v=vid{idx}"),
                transcript: String::new(),
            });
        }
        videos
    }

    #[tokio::test]
    async fn play_video_most_viewed_returns_card() {
        let videos = videos();
        let toolset = VideoToolset::new(&videos);

        let outcome = toolset
            .execute(PLAY_VIDEO, &json!({"selector": "most viewed"}))
            .await;

        match outcome.chart {
            Some(ChartPayload::PlayVideoCard {
                title,
                thumbnail_url,
                ..
            }) => {
                assert_eq!(title, "Beta");
                assert!(thumbnail_url.contains("i.ytimg.com/vi/vid1/"));
            }
            other => panic!("expected a play-video card, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn play_video_out_of_range_is_an_error() {
        let videos = videos();
        let toolset = VideoToolset::new(&videos);
        let outcome = toolset.execute(PLAY_VIDEO, &json!({"selector": "4"})).await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn duration_stats_exclude_unparseable_strings() {
        let videos = videos();
        let toolset = VideoToolset::new(&videos);

        let outcome = toolset
            .execute(COMPUTE_STATS_JSON, &json!({"field": "duration_seconds"}))
            .await;

        assert_eq!(outcome.result["count"], 2);
        assert_eq!(outcome.result["mean"], 1926.5);
        assert_eq!(outcome.result["field"], "duration_seconds");
    }

    #[tokio::test]
    async fn metric_plot_is_chronological() {
        let videos = videos();
        let toolset = VideoToolset::new(&videos);

        let outcome = toolset
            .execute(PLOT_METRIC_VS_TIME, &json!({"metric_field": "view_count"}))
            .await;

        match outcome.chart {
            Some(ChartPayload::MetricVsTimeChart { points, .. }) => {
                assert_eq!(points.len(), 3);
                assert!(points.windows(2).all(|w| w[0].date <= w[1].date));
            }
            other => panic!("expected a metric chart, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn data_guard_blocks_everything_but_image_generation() {
        let toolset =
            VideoToolset::new(&[]).with_image_delegate(Arc::new(MockImageDelegate));

        let blocked = toolset
            .execute(COMPUTE_STATS_JSON, &json!({"field": "view_count"}))
            .await;
        assert!(blocked.is_error());

        let image = toolset
            .execute(GENERATE_IMAGE, &json!({"prompt": "a quiet harbor"}))
            .await;
        assert!(!image.is_error());
        assert!(matches!(
            image.chart,
            Some(ChartPayload::GeneratedImage { .. })
        ));
    }
}
