use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::{
    ApiFailure, Choice, ChoiceMessage, CompletionRequest, CompletionResponse, FunctionCall,
    StreamEvent, ToolCallPayload,
};
use super::{CompletionBackend, EventStream};

/// Queue-scripted backend for orchestrator tests. Non-streaming calls pop the
/// next scripted response; an optional repeating tool call stands in when the
/// queue runs dry (used to exercise the round bound). Streaming calls pop the
/// next scripted frame sequence.
#[derive(Default)]
pub struct ScriptedBackend {
    completions: Mutex<VecDeque<CompletionResponse>>,
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    repeating_tool_call: Mutex<Option<(String, String)>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_counter: AtomicU64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.completions
            .lock()
            .expect("lock poisoned")
            .push_back(text_response(text.into()));
    }

    pub fn push_tool_call(&self, name: &str, arguments: &str) {
        let id = self.next_call_id();
        self.completions
            .lock()
            .expect("lock poisoned")
            .push_back(tool_call_response(&id, name, arguments));
    }

    /// Once the scripted queue is exhausted, keep answering with this tool
    /// call forever. A backend in this mode never converges.
    pub fn repeat_tool_call(&self, name: &str, arguments: &str) {
        *self.repeating_tool_call.lock().expect("lock poisoned") =
            Some((name.to_string(), arguments.to_string()));
    }

    pub fn push_stream(&self, events: Vec<StreamEvent>) {
        self.streams
            .lock()
            .expect("lock poisoned")
            .push_back(events);
    }

    /// Every request this backend has seen, for assertions on message shape.
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }

    fn next_call_id(&self) -> String {
        let id = self.call_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("call-{id}")
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ApiFailure> {
        self.requests.lock().expect("lock poisoned").push(request);

        if let Some(response) = self.completions.lock().expect("lock poisoned").pop_front() {
            return Ok(response);
        }

        if let Some((name, arguments)) = self
            .repeating_tool_call
            .lock()
            .expect("lock poisoned")
            .clone()
        {
            let id = self.next_call_id();
            return Ok(tool_call_response(&id, &name, &arguments));
        }

        Ok(text_response(String::new()))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream, ApiFailure> {
        self.requests.lock().expect("lock poisoned").push(request);

        let events = self
            .streams
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_default();

        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

fn text_response(text: String) -> CompletionResponse {
    CompletionResponse {
        choices: vec![Choice {
            message: ChoiceMessage {
                content: Some(text),
                tool_calls: None,
            },
        }],
    }
}

fn tool_call_response(id: &str, name: &str, arguments: &str) -> CompletionResponse {
    CompletionResponse {
        choices: vec![Choice {
            message: ChoiceMessage {
                content: None,
                tool_calls: Some(vec![ToolCallPayload {
                    id: id.to_string(),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: name.to_string(),
                        arguments: arguments.to_string(),
                    },
                }]),
            },
        }],
    }
}

/// Stand-in backend for running the CLI without any API configured.
pub struct OfflineBackend;

#[async_trait]
impl CompletionBackend for OfflineBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ApiFailure> {
        Ok(text_response(format!(
            "[offline backend] Received {} messages. Configure CHAT_API_KEY to reach a real endpoint.",
            request.messages.len()
        )))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream, ApiFailure> {
        let text = format!(
            "[offline backend] Received {} messages. Configure CHAT_API_KEY to reach a real endpoint.",
            request.messages.len()
        );
        Ok(Box::pin(futures::stream::iter(vec![Ok(
            StreamEvent::Text { text },
        )])))
    }
}
