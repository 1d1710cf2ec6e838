use std::fmt;

use serde::{Deserialize, Serialize};

/// How one user turn gets executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnMode {
    /// Delegated to the backend's code-execution path (visualization and
    /// statistical modeling beyond the fixed tool set).
    CodeExecution,
    /// Client-side tools over the attached channel dataset.
    VideoTools,
    /// Client-side tools over the loaded CSV dataset.
    CsvTools,
    /// Plain streaming chat.
    Streaming,
}

impl fmt::Display for TurnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TurnMode::CodeExecution => "code_execution",
            TurnMode::VideoTools => "video_tools",
            TurnMode::CsvTools => "csv_tools",
            TurnMode::Streaming => "streaming",
        };
        write!(f, "{label}")
    }
}

/// What is loaded or attached when the turn arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnContext {
    pub csv_loaded: bool,
    /// A CSV file arrived with this turn (not yet part of the loaded state).
    pub csv_attached: bool,
    pub channel_loaded: bool,
    pub image_attached: bool,
}

#[derive(Debug, Clone)]
pub struct ModeDecision {
    pub mode: TurnMode,
    pub rationale: String,
}

/// Requests that need real visualization or statistical modeling; these always
/// go to code execution, even when a dataset is loaded.
const PYTHON_ONLY_KEYWORDS: &[&str] = &[
    "regression",
    "scatter",
    "histogram",
    "pandas",
    "numpy",
    "scipy",
    "seaborn",
    "matplotlib",
    "statsmodels",
    "sklearn",
    "scikit-learn",
    "time series",
    "time-series",
    "heatmap",
    "box plot",
    "boxplot",
    "violin",
    "distribution",
    "linear model",
    "logistic model",
    "forecast",
    "trend line",
    "trendline",
];

/// Generic code/analysis vocabulary; routed to code execution only when no
/// CSV dataset competes for the request.
const CODE_ANALYSIS_KEYWORDS: &[&str] = &[
    "python",
    "code",
    "script",
    "notebook",
    "plot",
    "chart",
    "graph",
    "visualize",
    "visualization",
    "analyze",
    "analysis",
    "correlation",
    "simulate",
];

/// The request needs visualization/statistical tooling the fixed tool set
/// cannot provide.
pub fn needs_python_analysis(normalized_text: &str) -> Option<&'static str> {
    PYTHON_ONLY_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| normalized_text.contains(keyword))
}

/// The request mentions code or open-ended analysis.
pub fn mentions_code_analysis(normalized_text: &str) -> Option<&'static str> {
    CODE_ANALYSIS_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| normalized_text.contains(keyword))
}

/// Pick the execution mode for one turn. Rules apply in priority order;
/// client-side tools are preferred whenever the request is answerable from
/// locally held structured data.
pub fn select_mode(text: &str, context: &TurnContext) -> ModeDecision {
    let normalized = text.to_lowercase();

    if let Some(keyword) = needs_python_analysis(&normalized) {
        return ModeDecision {
            mode: TurnMode::CodeExecution,
            rationale: format!("Visualization/statistical request (matched '{keyword}')"),
        };
    }

    if !context.csv_loaded {
        if let Some(keyword) = mentions_code_analysis(&normalized) {
            return ModeDecision {
                mode: TurnMode::CodeExecution,
                rationale: format!("Code/analysis request with no dataset loaded (matched '{keyword}')"),
            };
        }
    }

    if (context.channel_loaded || context.image_attached) && !context.csv_loaded {
        return ModeDecision {
            mode: TurnMode::VideoTools,
            rationale: String::from("Channel data or image attached and no CSV competes for the turn"),
        };
    }

    if context.csv_loaded && !context.csv_attached {
        return ModeDecision {
            mode: TurnMode::CsvTools,
            rationale: String::from("CSV dataset loaded; request answerable with client-side tools"),
        };
    }

    ModeDecision {
        mode: TurnMode::Streaming,
        rationale: String::from("No tool context applies; plain streaming chat"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(csv_loaded: bool, channel_loaded: bool) -> TurnContext {
        TurnContext {
            csv_loaded,
            channel_loaded,
            ..TurnContext::default()
        }
    }

    #[test]
    fn python_only_keywords_override_loaded_csv() {
        let decision = select_mode("plot a histogram of views", &ctx(true, false));
        assert_eq!(decision.mode, TurnMode::CodeExecution);
    }

    #[test]
    fn loaded_csv_wins_for_plain_questions() {
        let decision = select_mode("what's the average engagement", &ctx(true, false));
        assert_eq!(decision.mode, TurnMode::CsvTools);
    }

    #[test]
    fn generic_code_keywords_defer_to_a_loaded_csv() {
        // Rule 2 requires no CSV; with one loaded, the CSV tools keep the turn.
        let decision = select_mode("analyze the top posts", &ctx(true, false));
        assert_eq!(decision.mode, TurnMode::CsvTools);

        let decision = select_mode("analyze the top posts", &ctx(false, false));
        assert_eq!(decision.mode, TurnMode::CodeExecution);
    }

    #[test]
    fn channel_data_routes_to_video_tools_unless_csv_loaded() {
        let decision = select_mode("which video did best?", &ctx(false, true));
        assert_eq!(decision.mode, TurnMode::VideoTools);

        let decision = select_mode("which video did best?", &ctx(true, true));
        assert_eq!(decision.mode, TurnMode::CsvTools);
    }

    #[test]
    fn attached_image_routes_to_video_tools() {
        let context = TurnContext {
            image_attached: true,
            ..TurnContext::default()
        };
        let decision = select_mode("make this pop", &context);
        assert_eq!(decision.mode, TurnMode::VideoTools);
    }

    #[test]
    fn fresh_csv_attachment_falls_through_to_streaming() {
        let context = TurnContext {
            csv_loaded: true,
            csv_attached: true,
            ..TurnContext::default()
        };
        let decision = select_mode("here is my new data", &context);
        assert_eq!(decision.mode, TurnMode::Streaming);
    }

    #[test]
    fn empty_context_streams() {
        let decision = select_mode("hello there", &TurnContext::default());
        assert_eq!(decision.mode, TurnMode::Streaming);
    }
}
