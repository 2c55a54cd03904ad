//! `POST /v1/chat/completions`.
//!
//! A request moves through reading the body, parsing, validation, routing,
//! tool preparation, invocation and responding. Until response headers are
//! written every failure leaves as a JSON error body. After that it can only
//! be reported as an SSE `error` event.
//!
//! One cancellation token per request links the ways a call can end early:
//! the client going away (the handler future or the body stream is dropped),
//! the deadline, and gateway shutdown (the token is a child of the shutdown
//! token). It is disarmed only when the response completes normally.

use std::future::Future;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use lmbridge_core::contracts::{ChatCompletionChunk, ChatCompletionRequest};
use lmbridge_core::services::converter::{
    ImageHandling, StreamContext, StreamTranslator, build_completion, collect_response,
    to_backend_request,
};
use lmbridge_core::services::tokens::prompt_text;
use lmbridge_core::services::{
    AdmissionPermit, PreparedTools, ValidationLimits, estimate_request_tokens, parse_request,
    prepare_tools, validate_request,
};
use lmbridge_core::{
    BackendError, BackendFragment, BackendRequest, BackendResponse, GatewayError,
    ModelCapabilities, RequestContext, ValidationError,
};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::sse;
use crate::state::AppState;

/// Backend error text that suggests the model cannot take tools.
const TOOL_ERROR_KEYWORDS: &[&str] = &["tool", "function"];

type Fragments = BoxStream<'static, Result<BackendFragment, BackendError>>;

/// Route entry point: admission first, then the pipeline.
pub async fn chat_completions(State(state): State<AppState>, request: Request) -> Response {
    state.stats.record_request();

    let permit = match state.admission.try_admit() {
        Ok(permit) => permit,
        Err(err) => {
            state.stats.record_rate_limited();
            warn!(error = %err, "Request rejected by admission control");
            return ApiError(err).into_response();
        }
    };

    let stats = std::sync::Arc::clone(&state.stats);
    match RequestHandler::new(state).handle(request, permit).await {
        Ok(response) => response,
        Err(err) => {
            stats.record_failed();
            if matches!(err, GatewayError::ToolCallRequired) {
                stats.record_required_violation();
            }
            warn!(status = err.status_code(), error = %err, "Chat completion failed");
            ApiError(err).into_response()
        }
    }
}

/// Whether a failed call is worth retrying without tools.
fn is_tool_incompatibility(err: &BackendError) -> bool {
    let message = err.message.to_lowercase();
    TOOL_ERROR_KEYWORDS.iter().any(|k| message.contains(k))
}

fn frame(bytes: Bytes) -> Result<Bytes, std::io::Error> {
    Ok(bytes)
}

/// A validated, routed request ready for the backend.
struct Prepared {
    request: ChatCompletionRequest,
    context: RequestContext,
    model: ModelCapabilities,
    tools: PreparedTools,
    backend_request: BackendRequest,
    prompt_tokens: u32,
}

/// Orchestrates one chat completion.
pub struct RequestHandler {
    state: AppState,
    timeout: Duration,
    deadline: Instant,
}

impl RequestHandler {
    pub fn new(state: AppState) -> Self {
        let timeout = state.settings.request_timeout();
        Self {
            state,
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    /// Run the pipeline. The permit is held until the response is complete,
    /// which for a stream means until the last frame is sent.
    pub async fn handle(
        &self,
        request: Request,
        permit: AdmissionPermit,
    ) -> Result<Response, GatewayError> {
        let cancel = self.state.shutdown.child_token();
        let guard = cancel.clone().drop_guard();

        let declared = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let body = self.guarded(self.read_body(request.into_body(), declared)).await?;
        let prepared = self.guarded(self.prepare(&body)).await?;
        let response = self.guarded(self.invoke(&prepared, &cancel)).await?;

        if prepared.request.stream {
            self.stream(prepared, response, permit, guard).await
        } else {
            let response = self.complete(prepared, response).await?;
            guard.disarm();
            Ok(response)
        }
    }

    /// Race `work` against the deadline and shutdown.
    async fn guarded<T>(
        &self,
        work: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        tokio::select! {
            biased;
            () = self.state.shutdown.cancelled() => Err(GatewayError::ShuttingDown),
            () = tokio::time::sleep_until(self.deadline) => Err(GatewayError::Timeout(self.timeout)),
            result = work => result,
        }
    }

    /// Buffer the body, stopping as soon as it exceeds the limit.
    async fn read_body(&self, body: Body, declared: Option<usize>) -> Result<Bytes, GatewayError> {
        let limit = self.state.settings.max_body_bytes;
        if declared.is_some_and(|len| len > limit) {
            return Err(GatewayError::PayloadTooLarge { limit });
        }

        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                Err(GatewayError::PayloadTooLarge { limit })
            }
            Err(e) => Err(ValidationError::new(format!("Failed to read request body: {e}")).into()),
        }
    }

    async fn prepare(&self, body: &[u8]) -> Result<Prepared, GatewayError> {
        let settings = &self.state.settings;

        let request = parse_request(body)?;
        let summary = validate_request(&request, ValidationLimits::from_settings(settings))?;
        let tools = prepare_tools(&request)?;
        if !tools.is_empty() {
            self.state.stats.record_with_tools();
        }

        if !self.state.availability.is_available().await {
            return Err(GatewayError::BackendUnavailable);
        }

        let model = self.state.discovery.resolve(&request.model).await?;
        let estimated = estimate_request_tokens(&request);
        let context = RequestContext::from_request(&request, estimated).with_capabilities(model.clone());

        let missing = context.missing_capabilities();
        if !missing.is_empty() {
            debug!(
                request_id = %context.id,
                model = %model.id,
                missing = ?missing.labels(),
                "Routed model was not detected to support every requested capability"
            );
        }

        let prompt_tokens = self
            .state
            .backend
            .count_tokens(&model.id, &prompt_text(&request))
            .await
            .unwrap_or(estimated);
        if model.max_input_tokens > 0 && prompt_tokens > model.max_input_tokens {
            return Err(ValidationError::at(
                "messages",
                format!(
                    "prompt is about {prompt_tokens} tokens but model '{}' accepts at most {}",
                    model.id, model.max_input_tokens
                ),
            )
            .with_code("context_length_exceeded")
            .into());
        }

        let images = ImageHandling {
            forward_binary: self.state.backend.supports_image_input() && model.supports_vision,
            policy: &settings.images,
        };
        let backend_request = to_backend_request(&request, &model.id, &tools, images);

        info!(
            request_id = %context.id,
            model = %model.id,
            stream = request.stream,
            tools = tools.tools.len(),
            required = tools.required,
            tool_calls = summary.tool_calls,
            pending = summary.pending,
            prompt_tokens,
            "Dispatching chat completion"
        );

        Ok(Prepared {
            request,
            context,
            model,
            tools,
            backend_request,
            prompt_tokens,
        })
    }

    /// Call the backend, retrying once without tools when the failure looks
    /// like tool incompatibility and the request allows it.
    async fn invoke(
        &self,
        prepared: &Prepared,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, GatewayError> {
        let backend = &self.state.backend;
        match backend
            .send_request(prepared.backend_request.clone(), cancel.clone())
            .await
        {
            Ok(response) => Ok(response),
            Err(_) if cancel.is_cancelled() => Err(GatewayError::Cancelled),
            Err(err) if prepared.tools.allows_fallback() && is_tool_incompatibility(&err) => {
                warn!(
                    request_id = %prepared.context.id,
                    error = %err,
                    "Backend rejected tools, retrying without them"
                );
                self.state.stats.record_tool_fallback();
                Ok(backend
                    .send_request(prepared.backend_request.without_tools(), cancel.clone())
                    .await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn complete(
        &self,
        prepared: Prepared,
        response: BackendResponse,
    ) -> Result<Response, GatewayError> {
        let aggregated = self
            .guarded(async { Ok(collect_response(response.fragments).await?) })
            .await?;

        if prepared.tools.required && aggregated.tool_calls.is_empty() {
            return Err(GatewayError::ToolCallRequired);
        }

        self.state
            .stats
            .record_tool_calls(aggregated.tool_calls.len() as u64);
        let completion = build_completion(
            &prepared.context.id,
            &prepared.model.id,
            Utc::now().timestamp(),
            aggregated,
            prepared.tools.legacy,
            prepared.prompt_tokens,
        );
        self.state.stats.record_completed();
        Ok(Json(completion).into_response())
    }

    /// Stream the response as SSE.
    ///
    /// In required tool mode nothing is sent, headers included, until the
    /// first tool call arrives; a stream that never produces one is answered
    /// with a plain error instead.
    async fn stream(
        &self,
        prepared: Prepared,
        response: BackendResponse,
        permit: AdmissionPermit,
        guard: DropGuard,
    ) -> Result<Response, GatewayError> {
        let mut fragments = response.fragments;
        let mut translator = StreamTranslator::new(StreamContext {
            id: prepared.context.id.clone(),
            model: prepared.model.id.clone(),
            created: Utc::now().timestamp(),
            required: prepared.tools.required,
            legacy: prepared.tools.legacy,
            include_usage: prepared.request.include_usage_in_stream(),
            prompt_tokens: prepared.prompt_tokens,
        });

        let initial = if translator.is_buffering() {
            self.guarded(prime(&mut translator, &mut fragments)).await?
        } else {
            Vec::new()
        };

        let state = self.state.clone();
        let deadline = self.deadline;
        let timeout = self.timeout;
        let request_id = prepared.context.id;

        let frames = async_stream::stream! {
            let _permit = permit;
            let mut guard = Some(guard);

            for chunk in &initial {
                yield frame(sse::data_frame(chunk));
            }

            let mut failure = None;
            loop {
                let next = tokio::select! {
                    biased;
                    () = state.shutdown.cancelled() => Err(GatewayError::ShuttingDown),
                    () = tokio::time::sleep_until(deadline) => Err(GatewayError::Timeout(timeout)),
                    item = fragments.next() => Ok(item),
                };
                match next {
                    Ok(Some(Ok(fragment))) => {
                        for chunk in translator.on_fragment(fragment) {
                            yield frame(sse::data_frame(&chunk));
                        }
                    }
                    Ok(Some(Err(err))) => {
                        failure = Some(GatewayError::from(err));
                        break;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            state.stats.record_tool_calls(u64::from(translator.tool_calls()));
            if failure.is_none() {
                match translator.finish() {
                    Ok(chunks) => {
                        for chunk in &chunks {
                            yield frame(sse::data_frame(chunk));
                        }
                    }
                    Err(err) => failure = Some(err),
                }
            }

            match failure {
                None => {
                    if let Some(guard) = guard.take() {
                        guard.disarm();
                    }
                    state.stats.record_completed();
                    debug!(request_id = %request_id, "Stream complete");
                    yield frame(sse::done_frame());
                }
                Some(err) => {
                    state.stats.record_failed();
                    warn!(request_id = %request_id, error = %err, "Stream failed after headers were sent");
                    yield frame(sse::error_frame(&err));
                }
            }
        };

        Ok(sse::sse_response(frames))
    }
}

/// Pull fragments until the translator stops holding chunks back.
async fn prime(
    translator: &mut StreamTranslator,
    fragments: &mut Fragments,
) -> Result<Vec<ChatCompletionChunk>, GatewayError> {
    while let Some(fragment) = fragments.next().await {
        let released = translator.on_fragment(fragment?);
        if !translator.is_buffering() {
            return Ok(released);
        }
    }
    Err(GatewayError::ToolCallRequired)
}
