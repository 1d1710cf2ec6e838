use std::env;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use super::types::{
    ApiFailure, CompletionRequest, CompletionResponse, StreamEvent, DONE_SENTINEL,
};
use super::{CompletionBackend, EventStream};

/// Connection settings for the chat/proxy backend, read once at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub connect_timeout_ms: u64,
}

impl ApiConfig {
    const BASE_URL_VARS: [&'static str; 2] = ["CHAT_API_BASE_URL", "TABULA_CHAT_API_BASE_URL"];
    const API_KEY_VARS: [&'static str; 2] = ["CHAT_API_KEY", "TABULA_CHAT_API_KEY"];
    const TIMEOUT_VARS: [&'static str; 2] = [
        "CHAT_API_CONNECT_TIMEOUT_MS",
        "TABULA_CHAT_API_CONNECT_TIMEOUT_MS",
    ];

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = Self::read_env(&Self::API_KEY_VARS)
            .context("Set CHAT_API_KEY (or TABULA_CHAT_API_KEY) to use the completion backend")?;
        let base_url = Self::read_env(&Self::BASE_URL_VARS)
            .unwrap_or_else(|| "http://127.0.0.1:8787/api/chat".to_string());
        let connect_timeout_ms = Self::read_env(&Self::TIMEOUT_VARS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10_000);

        Ok(Self {
            base_url,
            api_key,
            connect_timeout_ms,
        })
    }

    fn read_env(candidates: &[&'static str]) -> Option<String> {
        candidates.iter().find_map(|key| env::var(key).ok())
    }
}

/// HTTP client for the completion endpoint. One POST per call; streaming
/// responses arrive as server-sent-event frames.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl HttpCompletionClient {
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        // Connect timeout only: streamed turns legitimately stay open for a while.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms.max(1)))
            .build()
            .context("Failed to build completion HTTP client")?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(ApiConfig::from_env()?)
    }

    async fn send(&self, request: &CompletionRequest) -> Result<reqwest::Response, ApiFailure> {
        let response = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiFailure::Auth);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message: String = message.chars().take(300).collect();
            return Err(ApiFailure::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionClient {
    #[instrument(level = "debug", skip_all, fields(messages = request.messages.len()))]
    async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, ApiFailure> {
        request.stream = false;
        let response = self.send(&request).await?;
        response
            .json::<CompletionResponse>()
            .await
            .map_err(|err| ApiFailure::Decode(err.to_string()))
    }

    #[instrument(level = "debug", skip_all, fields(messages = request.messages.len()))]
    async fn stream(&self, mut request: CompletionRequest) -> Result<EventStream, ApiFailure> {
        request.stream = true;
        let response = self.send(&request).await?;
        debug!("Streaming response opened");

        let events = response
            .bytes_stream()
            .scan(String::new(), |buffer, chunk| {
                let items: Vec<Result<SseItem, ApiFailure>> = match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_sse_items(buffer).into_iter().map(Ok).collect()
                    }
                    Err(err) => vec![Err(ApiFailure::from(err))],
                };
                futures::future::ready(Some(futures::stream::iter(items)))
            })
            .flatten()
            .take_while(|item| futures::future::ready(!matches!(item, Ok(SseItem::Done))))
            .filter_map(|item| async move {
                match item {
                    Ok(SseItem::Event(event)) => Some(Ok(event)),
                    Ok(SseItem::Done) => None,
                    Err(err) => Some(Err(err)),
                }
            });

        Ok(Box::pin(events))
    }
}

#[derive(Debug, PartialEq)]
enum SseItem {
    Event(StreamEvent),
    Done,
}

/// Pull every complete `data:` line out of the buffer, leaving any partial
/// trailing line in place for the next chunk. Undecodable frames are skipped.
fn drain_sse_items(buffer: &mut String) -> Vec<SseItem> {
    let mut items = Vec::new();

    while let Some(newline) = buffer.find('\n') {
        let line: String = buffer[..newline].trim().to_string();
        buffer.replace_range(..=newline, "");

        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();

        if payload == DONE_SENTINEL {
            items.push(SseItem::Done);
            break;
        }

        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => items.push(SseItem::Event(event)),
            Err(err) => warn!(?err, "Skipping undecodable stream frame"),
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_handles_split_frames_across_chunks() {
        let mut buffer = String::from("data: {\"type\":\"text\",\"te");
        assert!(drain_sse_items(&mut buffer).is_empty());

        buffer.push_str("xt\":\"hello\"}\ndata: [DONE]\n");
        let items = drain_sse_items(&mut buffer);

        assert_eq!(
            items,
            vec![
                SseItem::Event(StreamEvent::Text {
                    text: "hello".to_string()
                }),
                SseItem::Done,
            ]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_skips_comments_and_garbage_lines() {
        let mut buffer =
            String::from(": keepalive\nnot-data\ndata: {\"bogus\":1}\ndata: {\"type\":\"text\",\"text\":\"x\"}\n");
        let items = drain_sse_items(&mut buffer);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn done_sentinel_stops_draining() {
        let mut buffer =
            String::from("data: [DONE]\ndata: {\"type\":\"text\",\"text\":\"late\"}\n");
        let items = drain_sse_items(&mut buffer);
        assert_eq!(items, vec![SseItem::Done]);
    }
}
