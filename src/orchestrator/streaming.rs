use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::future;
use futures::StreamExt;
use tracing::instrument;

use crate::completion::{CompletionRequest, EventStream, SharedBackend, WireMessage};

/// Cooperative cancellation handle shared between the stream consumer and
/// whoever decides to stop the turn. Checked between yielded chunks; an
/// in-flight chunk is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Relays streaming turns: no tools are declared, and the backend's frames
/// pass through unchanged until the stream ends or the token trips.
pub struct StreamingOrchestrator {
    backend: SharedBackend,
}

impl StreamingOrchestrator {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Open a streaming turn. `messages` already carries the system
    /// instruction, history, and user message (with image parts when any
    /// were attached).
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn run_turn(
        &self,
        messages: Vec<WireMessage>,
        cancel: CancelToken,
    ) -> Result<EventStream> {
        let request = CompletionRequest {
            messages,
            stream: true,
            tools: None,
            tool_choice: None,
        };
        let stream = self.backend.stream(request).await?;

        let guarded = stream.take_while(move |_| future::ready(!cancel.is_cancelled()));
        Ok(Box::pin(guarded))
    }
}
