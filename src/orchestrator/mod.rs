pub mod function_calling;
pub mod mode;
pub mod prompt;
pub mod streaming;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::completion::{ContentPart, EventStream, Role, SharedBackend, WireMessage};
use crate::dataset::channel::{ChannelData, METRIC_FIELDS};
use crate::dataset::{CsvDataset, SummaryOptions};
use crate::image_gen::{ImageAttachment, SharedImageDelegate};
use crate::tools::{ChartPayload, CsvToolset, ToolCallRecord, VideoToolset};

pub use function_calling::{FunctionCallingOrchestrator, ToolTurn, MAX_ROUNDS};
pub use mode::{select_mode, ModeDecision, TurnContext, TurnMode};
pub use prompt::{extract_user_name, PromptConfig};
pub use streaming::{CancelToken, StreamingOrchestrator};

/// Everything loaded across turns of one conversation. Datasets are loaded
/// eagerly (with enrichment) so every later turn works on the same data.
#[derive(Default)]
pub struct SessionState {
    pub csv: Option<CsvDataset>,
    pub channel: Option<ChannelData>,
    pub summary_options: SummaryOptions,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and enrich a CSV attachment, replacing any previously loaded
    /// dataset.
    #[instrument(skip_all, fields(bytes = text.len()))]
    pub fn load_csv(&mut self, text: &str) -> Result<()> {
        let mut dataset = CsvDataset::from_text(text);
        if dataset.is_empty() {
            bail!("The attached CSV has no data rows");
        }
        dataset.enrich_engagement();
        info!(
            rows = dataset.rows.len(),
            columns = dataset.columns.len(),
            "CSV dataset loaded"
        );
        self.csv = Some(dataset);
        Ok(())
    }

    /// Parse a channel-data JSON document, replacing any previously loaded
    /// channel.
    #[instrument(skip_all, fields(bytes = raw.len()))]
    pub fn load_channel(&mut self, raw: &str) -> Result<()> {
        let channel = ChannelData::from_json(raw)?;
        if channel.videos.is_empty() {
            bail!("The channel document contains no videos");
        }
        info!(videos = channel.videos.len(), "Channel data loaded");
        self.channel = Some(channel);
        Ok(())
    }

    /// Context note prepended to the user's message once data is loaded; the
    /// model sees this description instead of raw rows.
    pub fn context_note(&self) -> Option<String> {
        if let Some(csv) = &self.csv {
            return Some(format!(
                "Loaded CSV columns: {}.\n{}",
                csv.columns.join(", "),
                csv.summary(&self.summary_options)
            ));
        }
        if let Some(channel) = &self.channel {
            return Some(format!(
                "Loaded YouTube channel {} with {} videos. Metric fields: {}.",
                channel.channel_url,
                channel.videos.len(),
                METRIC_FIELDS.join(", ")
            ));
        }
        None
    }
}

/// One user turn as it arrives from the surface layer.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub text: String,
    pub images: Vec<ImageAttachment>,
    /// A CSV file arrived with this very turn (already loaded into the
    /// session); the turn streams so the model can acknowledge the upload.
    pub csv_attached: bool,
}

impl TurnRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Completed tool-mode turn, ready for rendering and persistence.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub mode: TurnMode,
    pub text: String,
    pub charts: Vec<ChartPayload>,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// What dispatch hands back: either a finished turn or an open stream the
/// caller drains.
pub enum TurnReply {
    Completed(TurnOutcome),
    Streaming { mode: TurnMode, events: EventStream },
}

/// Persisted conversation message. Image data never reaches this shape;
/// charts are stored in their stripped form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ChartPayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl StoredMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Utc::now(),
            charts: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            timestamp: Utc::now(),
            charts: Vec::new(),
            tool_calls: Vec::new(),
        }
    }

    pub fn from_outcome(outcome: &TurnOutcome) -> Self {
        Self {
            role: Role::Assistant,
            content: outcome.text.clone(),
            timestamp: Utc::now(),
            charts: outcome.charts.iter().map(ChartPayload::persistable).collect(),
            tool_calls: outcome.tool_calls.clone(),
        }
    }
}

/// Front door of the orchestration core: selects a mode for each turn and
/// runs the matching orchestrator.
pub struct TurnRouter {
    backend: SharedBackend,
    image_delegate: Option<SharedImageDelegate>,
    prompt: PromptConfig,
}

impl TurnRouter {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            image_delegate: None,
            prompt: PromptConfig::default(),
        }
    }

    pub fn with_image_delegate(mut self, delegate: SharedImageDelegate) -> Self {
        self.image_delegate = Some(delegate);
        self
    }

    pub fn with_prompt(mut self, prompt: PromptConfig) -> Self {
        self.prompt = prompt;
        self
    }

    /// Run one user turn end to end.
    #[instrument(skip_all, fields(mode = tracing::field::Empty))]
    pub async fn dispatch(
        &self,
        session: &SessionState,
        history: &[StoredMessage],
        request: &TurnRequest,
        cancel: CancelToken,
    ) -> Result<TurnReply> {
        let context = TurnContext {
            csv_loaded: session.csv.is_some(),
            csv_attached: request.csv_attached,
            channel_loaded: session.channel.is_some(),
            image_attached: !request.images.is_empty(),
        };
        let decision = select_mode(&request.text, &context);
        tracing::Span::current().record("mode", decision.mode.to_string().as_str());
        info!(mode = %decision.mode, rationale = %decision.rationale, "Turn routed");

        match decision.mode {
            TurnMode::CsvTools => {
                let Some(dataset) = session.csv.as_ref() else {
                    bail!("CSV tools selected without a loaded dataset");
                };
                let toolset = CsvToolset::new(dataset);
                let messages = self.build_messages(session, history, request, false);
                let turn = FunctionCallingOrchestrator::new(self.backend.clone())
                    .run_turn(&toolset, messages)
                    .await?;
                Ok(TurnReply::Completed(self.finish(decision.mode, turn)))
            }
            TurnMode::VideoTools => {
                let videos = session
                    .channel
                    .as_ref()
                    .map(|channel| channel.videos.as_slice())
                    .unwrap_or(&[]);
                let mut toolset =
                    VideoToolset::new(videos).with_anchor_image(request.images.first());
                if let Some(delegate) = &self.image_delegate {
                    toolset = toolset.with_image_delegate(delegate.clone());
                }
                let messages = self.build_messages(session, history, request, false);
                let turn = FunctionCallingOrchestrator::new(self.backend.clone())
                    .run_turn(&toolset, messages)
                    .await?;
                Ok(TurnReply::Completed(self.finish(decision.mode, turn)))
            }
            TurnMode::CodeExecution | TurnMode::Streaming => {
                let messages = self.build_messages(session, history, request, true);
                let events = StreamingOrchestrator::new(self.backend.clone())
                    .run_turn(messages, cancel)
                    .await?;
                Ok(TurnReply::Streaming {
                    mode: decision.mode,
                    events,
                })
            }
        }
    }

    fn finish(&self, mode: TurnMode, turn: ToolTurn) -> TurnOutcome {
        TurnOutcome {
            mode,
            text: turn.text,
            charts: turn.charts,
            tool_calls: turn.tool_calls,
        }
    }

    /// Assemble the wire message sequence: system instruction, prior turns,
    /// then the user message annotated with the dataset context note. Image
    /// attachments ride along only on streaming turns.
    fn build_messages(
        &self,
        session: &SessionState,
        history: &[StoredMessage],
        request: &TurnRequest,
        include_images: bool,
    ) -> Vec<WireMessage> {
        let prior_user_turns = history
            .iter()
            .filter(|message| message.role == Role::User)
            .map(|message| message.content.as_str());
        let user_name = extract_user_name(&request.text, prior_user_turns);

        let mut messages = vec![WireMessage::system(
            self.prompt.system_instruction(user_name.as_deref()),
        )];

        for stored in history {
            if stored.content.is_empty() {
                continue;
            }
            match stored.role {
                Role::User => messages.push(WireMessage::user(stored.content.clone())),
                Role::Assistant => messages.push(WireMessage::assistant(stored.content.clone())),
                _ => {}
            }
        }

        let annotated = match session.context_note() {
            Some(note) => format!("[Context]\n{note}\n\n{}", request.text),
            None => request.text.clone(),
        };

        if include_images && !request.images.is_empty() {
            let mut parts = vec![ContentPart::Text { text: annotated }];
            parts.extend(request.images.iter().map(|image| ContentPart::Image {
                data: image.data.clone(),
                mime_type: image.mime_type.clone(),
            }));
            messages.push(WireMessage::user_parts(parts));
        } else {
            messages.push(WireMessage::user(annotated));
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::completion::{MessageContent, ScriptedBackend, StreamEvent};
    use crate::tools::csv_tools::GET_TOP_TWEETS;

    const CSV: &str = "text,view_count,favorite_count\nfirst,100,10\nsecond,400,80\n";

    fn session_with_csv() -> SessionState {
        let mut session = SessionState::new();
        session.load_csv(CSV).expect("load csv");
        session
    }

    #[tokio::test]
    async fn csv_question_runs_the_tool_loop() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_tool_call(GET_TOP_TWEETS, r#"{"sort_column":"engagement"}"#);
        backend.push_text("Your second post leads on engagement.");

        let router = TurnRouter::new(backend.clone());
        let session = session_with_csv();
        let request = TurnRequest::text("what's my top post by engagement?");

        let reply = router
            .dispatch(&session, &[], &request, CancelToken::new())
            .await
            .expect("dispatch");

        match reply {
            TurnReply::Completed(outcome) => {
                assert_eq!(outcome.mode, TurnMode::CsvTools);
                assert_eq!(outcome.text, "Your second post leads on engagement.");
                assert_eq!(outcome.charts.len(), 1);
            }
            TurnReply::Streaming { .. } => panic!("expected a completed turn"),
        }

        // The annotated user message carries the dataset summary, not rows.
        let first = &backend.recorded_requests()[0].messages;
        match &first.last().unwrap().content {
            Some(MessageContent::Text(text)) => {
                assert!(text.contains("Loaded CSV columns"));
                assert!(text.ends_with("what's my top post by engagement?"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_chat_streams() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_stream(vec![StreamEvent::Text {
            text: "Hello!".into(),
        }]);

        let router = TurnRouter::new(backend);
        let session = SessionState::new();
        let request = TurnRequest::text("good morning");

        let reply = router
            .dispatch(&session, &[], &request, CancelToken::new())
            .await
            .expect("dispatch");

        match reply {
            TurnReply::Streaming { mode, mut events } => {
                assert_eq!(mode, TurnMode::Streaming);
                let first = events.next().await.expect("frame").expect("ok");
                assert_eq!(first, StreamEvent::Text { text: "Hello!".into() });
            }
            TurnReply::Completed(_) => panic!("expected a stream"),
        }
    }

    #[tokio::test]
    async fn histogram_request_streams_in_code_execution_mode() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_stream(Vec::new());

        let router = TurnRouter::new(backend);
        let session = session_with_csv();
        let request = TurnRequest::text("plot a histogram of views");

        let reply = router
            .dispatch(&session, &[], &request, CancelToken::new())
            .await
            .expect("dispatch");

        assert!(matches!(
            reply,
            TurnReply::Streaming {
                mode: TurnMode::CodeExecution,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn attached_images_ride_on_streaming_turns() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_stream(Vec::new());

        let router = TurnRouter::new(backend.clone());
        let session = SessionState::new();
        // "python" routes to code execution, which streams; the attached
        // image must ride along as a content part.
        let request = TurnRequest {
            text: "write a python script for me".into(),
            images: vec![ImageAttachment {
                data: "aW1n".into(),
                mime_type: "image/png".into(),
            }],
            csv_attached: false,
        };

        router
            .dispatch(&session, &[], &request, CancelToken::new())
            .await
            .expect("dispatch");

        let messages = &backend.recorded_requests()[0].messages;
        match &messages.last().unwrap().content {
            Some(MessageContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[1], ContentPart::Image { .. }));
            }
            other => panic!("expected content parts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prior_introduction_reaches_the_system_prompt() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_stream(Vec::new());

        let router = TurnRouter::new(backend.clone());
        let session = SessionState::new();
        let history = vec![
            StoredMessage::user("hi, my name is Priya"),
            StoredMessage::assistant("Nice to meet you, Priya!"),
        ];

        router
            .dispatch(
                &session,
                &history,
                &TurnRequest::text("how are you?"),
                CancelToken::new(),
            )
            .await
            .expect("dispatch");

        let system = &backend.recorded_requests()[0].messages[0];
        match &system.content {
            Some(MessageContent::Text(text)) => assert!(text.contains("Priya")),
            other => panic!("unexpected system content: {other:?}"),
        }
    }

    #[test]
    fn stored_messages_strip_image_data() {
        let outcome = TurnOutcome {
            mode: TurnMode::VideoTools,
            text: "Here you go!".into(),
            charts: vec![ChartPayload::GeneratedImage {
                image_data: "aGVhdnk=".into(),
                mime_type: "image/png".into(),
                prompt: "a fox".into(),
            }],
            tool_calls: vec![ToolCallRecord {
                name: "generateImage".into(),
                args: json!({"prompt": "a fox"}),
                result: json!({"ok": true}),
            }],
        };

        let stored = StoredMessage::from_outcome(&outcome);
        let value = serde_json::to_value(&stored).expect("serialize");
        assert_eq!(value["charts"][0]["image_data"], "");
        assert_eq!(value["toolCalls"][0]["name"], "generateImage");
    }

    #[test]
    fn loading_an_empty_csv_fails() {
        let mut session = SessionState::new();
        assert!(session.load_csv("only_header\n").is_err());
        assert!(session.csv.is_none());
    }
}
