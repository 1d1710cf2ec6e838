pub mod http;
pub mod mock;
pub mod types;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

pub use http::{ApiConfig, HttpCompletionClient};
pub use mock::{OfflineBackend, ScriptedBackend};
pub use types::{
    ApiFailure, CompletionRequest, CompletionResponse, ContentPart, MessageContent, Role,
    StreamEvent, ToolCallPayload, WireMessage,
};

pub type SharedBackend = Arc<dyn CompletionBackend>;

/// Finite, non-restartable sequence of streaming frames.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiFailure>> + Send>>;

/// The chat-completion endpoint, seen as a black box: one non-streaming call
/// that may request tool executions, and one streaming call yielding
/// incremental frames.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ApiFailure>;

    async fn stream(&self, request: CompletionRequest) -> Result<EventStream, ApiFailure>;
}

/// Build the HTTP backend from the environment, optionally falling back to the
/// offline backend when configuration is missing.
pub fn build_backend_from_env(default_to_offline: bool) -> anyhow::Result<SharedBackend> {
    match HttpCompletionClient::from_env() {
        Ok(client) => Ok(Arc::new(client)),
        Err(err) if default_to_offline => {
            tracing::warn!(?err, "Falling back to the offline completion backend");
            Ok(Arc::new(mock::OfflineBackend))
        }
        Err(err) => Err(err),
    }
}
