pub mod csv_tools;
pub mod video_tools;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dataset::channel::MetricPoint;
use crate::dataset::ToolError;

pub use csv_tools::CsvToolset;
pub use video_tools::VideoToolset;

/// A function the model may request. The description doubles as the usage
/// contract the model is expected to follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    /// Wire form consumed by the completion endpoint.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Record of one tool invocation within a turn. Appended to an ordered log,
/// never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub result: Value,
}

/// Closed set of renderable result payloads, distinguished by the `type`
/// discriminator on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChartPayload {
    #[serde(rename = "engagement-chart")]
    EngagementChart { points: Vec<EngagementPoint> },
    #[serde(rename = "metric-vs-time-chart")]
    MetricVsTimeChart {
        metric: String,
        points: Vec<MetricPoint>,
    },
    #[serde(rename = "play-video-card")]
    PlayVideoCard {
        video_id: String,
        title: String,
        thumbnail_url: String,
        video_url: String,
        published_at: String,
        view_count: i64,
    },
    #[serde(rename = "generated-image")]
    GeneratedImage {
        image_data: String,
        mime_type: String,
        prompt: String,
    },
    #[serde(rename = "tool-error")]
    ToolError { error: String },
}

impl ChartPayload {
    /// Strip payload fields that must never reach persistence (base64 image
    /// data stays in-memory for the UI only).
    pub fn persistable(&self) -> ChartPayload {
        match self {
            ChartPayload::GeneratedImage {
                mime_type, prompt, ..
            } => ChartPayload::GeneratedImage {
                image_data: String::new(),
                mime_type: mime_type.clone(),
                prompt: prompt.clone(),
            },
            other => other.clone(),
        }
    }
}

/// One point of a ranked engagement chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementPoint {
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement: Option<f64>,
}

/// What one tool execution hands back: the value relayed to the model, plus
/// an optional renderable chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub result: Value,
    pub chart: Option<ChartPayload>,
}

impl ToolOutcome {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            chart: None,
        }
    }

    pub fn with_chart(result: Value, chart: ChartPayload) -> Self {
        Self {
            result,
            chart: Some(chart),
        }
    }

    pub fn error(error: ToolError) -> Self {
        Self {
            result: serde_json::to_value(&error).unwrap_or_else(|_| json!({"error": error.error})),
            chart: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// A named set of locally executed tools offered to the model for one turn.
#[async_trait]
pub trait Toolset: Send + Sync {
    fn declarations(&self) -> Vec<ToolDeclaration>;

    async fn execute(&self, name: &str, args: &Value) -> ToolOutcome;
}

/// Pull one required string argument, or produce the standard missing-argument
/// error value.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ToolError::new(format!("Missing required argument '{key}'.")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_declaration_carries_fixed_shape() {
        let declaration = ToolDeclaration::new(
            "compute_column_stats",
            "Column statistics",
            json!({"type": "object", "properties": {}}),
        );
        let wire = declaration.to_wire();

        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "compute_column_stats");
    }

    #[test]
    fn chart_discriminators_match_the_renderer_contract() {
        let card = ChartPayload::PlayVideoCard {
            video_id: "v".into(),
            title: "t".into(),
            thumbnail_url: String::new(),
            video_url: String::new(),
            published_at: String::new(),
            view_count: 0,
        };
        let value = serde_json::to_value(&card).expect("serialize");
        assert_eq!(value["type"], "play-video-card");

        let err = ChartPayload::ToolError {
            error: "boom".into(),
        };
        assert_eq!(serde_json::to_value(&err).unwrap()["type"], "tool-error");
    }

    #[test]
    fn persistable_strips_image_data() {
        let chart = ChartPayload::GeneratedImage {
            image_data: "aGVhdnk=".into(),
            mime_type: "image/png".into(),
            prompt: "a fox".into(),
        };
        match chart.persistable() {
            ChartPayload::GeneratedImage {
                image_data, prompt, ..
            } => {
                assert!(image_data.is_empty());
                assert_eq!(prompt, "a fox");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn missing_argument_becomes_error_value() {
        let outcome = ToolOutcome::error(ToolError::new("Missing required argument 'column'."));
        assert!(outcome.is_error());
        assert_eq!(
            outcome.result["error"],
            "Missing required argument 'column'."
        );
    }
}
