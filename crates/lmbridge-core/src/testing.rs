//! Scripted in-memory backend for adapter tests.
//!
//! Each `send_request` pops the next [`Script`]; an empty queue answers with
//! a single `"ok"` text fragment.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use crate::ports::{
    BackendError, BackendFragment, BackendModelInfo, BackendRequest, BackendResponse,
    ChatBackendPort,
};

/// What the next backend call does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these fragments.
    Respond(Vec<BackendFragment>),
    /// Stream these fragments with a pause before each.
    Slow(Vec<BackendFragment>, Duration),
    /// Fail the call itself.
    Fail(BackendError),
    /// Stream the fragments, then fail mid-stream.
    FailAfter(Vec<BackendFragment>, BackendError),
    /// Never answer; resolves only once the call is cancelled.
    Hang,
}

/// In-memory [`ChatBackendPort`].
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    models: Mutex<Vec<BackendModelInfo>>,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<BackendRequest>>,
    list_calls: AtomicUsize,
    images: AtomicBool,
    cancelled: Arc<AtomicUsize>,
    token_count: Mutex<Option<u32>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend offering the given models.
    #[must_use]
    pub fn with_models(models: Vec<BackendModelInfo>) -> Self {
        let backend = Self::default();
        backend.set_models(models);
        backend
    }

    /// Model description with sensible limits.
    #[must_use]
    pub fn model(id: &str, max_input_tokens: u32) -> BackendModelInfo {
        BackendModelInfo {
            id: id.to_string(),
            vendor: "scripted".to_string(),
            family: id.to_string(),
            version: None,
            max_input_tokens,
            max_output_tokens: 4096,
        }
    }

    pub fn set_models(&self, models: Vec<BackendModelInfo>) {
        *lock(&self.models) = models;
    }

    pub fn push(&self, script: Script) {
        lock(&self.scripts).push_back(script);
    }

    pub fn set_image_input(&self, enabled: bool) {
        self.images.store(enabled, Ordering::Release);
    }

    pub fn set_token_count(&self, count: Option<u32>) {
        *lock(&self.token_count) = count;
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<BackendRequest> {
        lock(&self.requests).clone()
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Acquire)
    }

    /// Calls whose cancellation token fired.
    #[must_use]
    pub fn cancelled_calls(&self) -> usize {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ChatBackendPort for ScriptedBackend {
    async fn list_models(&self) -> Result<Vec<BackendModelInfo>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::AcqRel);
        let models = lock(&self.models).clone();
        Ok(models)
    }

    async fn send_request(
        &self,
        request: BackendRequest,
        cancel: CancellationToken,
    ) -> Result<BackendResponse, BackendError> {
        lock(&self.requests).push(request);

        let counter = Arc::clone(&self.cancelled);
        let watched = cancel.clone();
        tokio::spawn(async move {
            watched.cancelled().await;
            counter.fetch_add(1, Ordering::AcqRel);
        });

        let script = lock(&self.scripts).pop_front();
        let script = script.unwrap_or_else(|| {
            Script::Respond(vec![BackendFragment::Text("ok".to_string())])
        });

        match script {
            Script::Respond(fragments) => Ok(BackendResponse::new(
                stream::iter(fragments.into_iter().map(Ok)).boxed(),
            )),
            Script::Slow(fragments, delay) => Ok(BackendResponse::new(
                stream::iter(fragments)
                    .then(move |fragment| async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, BackendError>(fragment)
                    })
                    .take_until(cancel.cancelled_owned())
                    .boxed(),
            )),
            Script::Fail(err) => Err(err),
            Script::FailAfter(fragments, err) => Ok(BackendResponse::new(
                stream::iter(fragments.into_iter().map(Ok).chain(std::iter::once(Err(err)))).boxed(),
            )),
            Script::Hang => {
                cancel.cancelled().await;
                Err(BackendError::other("request cancelled"))
            }
        }
    }

    async fn count_tokens(&self, _model_id: &str, _text: &str) -> Option<u32> {
        let count = *lock(&self.token_count);
        count
    }

    fn supports_image_input(&self) -> bool {
        self.images.load(Ordering::Acquire)
    }
}
