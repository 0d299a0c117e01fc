use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{Completion, HttpRequestSpec, ProviderAdapter, StreamSink};
use crate::error::AppError;
use crate::sse::SseReader;

/// Cap on error bodies read back from a failed request.
const MAX_ERROR_BODY_BYTES: usize = 2 * 1024 * 1024; // 2MB

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues streaming requests and feeds decoded deltas to a sink.
pub struct StreamDispatch {
    client: Client,
}

impl Default for StreamDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDispatch {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("falling back to default HTTP client: {e}");
                Client::new()
            });

        Self { client }
    }

    /// Run one streaming request to completion.
    ///
    /// Calls `sink.on_delta` per text fragment, then exactly one of
    /// `on_complete` / `on_error`. The outcome is also returned. Once `cancel`
    /// fires no further delta or error callbacks happen, including while a
    /// failed response's body is still arriving.
    pub async fn stream(
        &self,
        adapter: &dyn ProviderAdapter,
        spec: HttpRequestSpec,
        cancel: &CancellationToken,
        sink: &mut dyn StreamSink,
    ) -> Result<Completion, AppError> {
        let result = self.stream_inner(adapter, spec, cancel, sink).await;
        match &result {
            Ok(completion) => sink.on_complete(*completion),
            Err(e) => sink.on_error(e),
        }
        result
    }

    async fn stream_inner(
        &self,
        adapter: &dyn ProviderAdapter,
        spec: HttpRequestSpec,
        cancel: &CancellationToken,
        sink: &mut dyn StreamSink,
    ) -> Result<Completion, AppError> {
        let provider = adapter.provider();
        let start = Instant::now();

        let mut request = self.client.post(&spec.url).json(&spec.body);
        for (name, value) in &spec.headers {
            request = request.header(name, value);
        }

        tracing::info!(%provider, "starting stream");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(%provider, "stream cancelled before response");
                return Ok(Completion::Cancelled);
            }
            r = request.send() => r?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        %provider,
                        status = status.as_u16(),
                        "stream cancelled while reading error body"
                    );
                    return Ok(Completion::Cancelled);
                }
                body = read_error_body(response) => body,
            };
            tracing::warn!(%provider, status = status.as_u16(), "provider returned error status");
            return Err(AppError::Provider {
                provider: provider.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let mut reader = SseReader::from_response(response)?;
        let mut deltas = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        %provider,
                        deltas,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "stream cancelled"
                    );
                    return Ok(Completion::Cancelled);
                }
                next = reader.next_event() => next,
            };

            let Some(payload) = next else {
                break;
            };
            let payload = payload?;

            let parsed = adapter.parse_event(&payload);
            if let Some(text) = parsed.delta.as_deref() {
                deltas += 1;
                sink.on_delta(text);
            }
            if let Some(message) = parsed.error {
                return Err(AppError::Provider {
                    provider: provider.to_string(),
                    status: status.as_u16(),
                    body: message,
                });
            }
            if parsed.done {
                break;
            }
        }

        tracing::info!(
            %provider,
            deltas,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "stream finished"
        );
        Ok(Completion::Finished)
    }
}

/// Read a failed response's body, capped at `MAX_ERROR_BODY_BYTES`.
async fn read_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        let room = MAX_ERROR_BODY_BYTES - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= MAX_ERROR_BODY_BYTES {
            break;
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
