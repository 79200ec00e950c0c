//! In-process generation backends for tests and dry runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{GenerationRequest, LlmClient};
use crate::pipeline::error::GenerationError;

type Reply = Result<String, GenerationError>;
type ResponderFn = dyn Fn(&GenerationRequest) -> Reply + Send + Sync;

enum Responder {
    Fixed(Reply),
    Script(Mutex<VecDeque<Reply>>),
    Func(Box<ResponderFn>),
}

/// Mock LLM client returning configured replies and recording every call.
pub struct MockLlmClient {
    responder: Responder,
    delay: Option<Duration>,
    log: CallLog,
}

impl MockLlmClient {
    /// Always answer with `response`.
    pub fn new(response: &str) -> Self {
        Self::with_responder(Responder::Fixed(Ok(response.to_string())))
    }

    /// Always fail with `error`.
    pub fn failing(error: GenerationError) -> Self {
        Self::with_responder(Responder::Fixed(Err(error)))
    }

    /// Answer with `replies` in call order; once exhausted, every call fails
    /// with a transport error.
    pub fn scripted(replies: Vec<Reply>) -> Self {
        Self::with_responder(Responder::Script(Mutex::new(replies.into())))
    }

    /// Compute each reply from the request (order-independent under concurrency).
    pub fn from_fn(f: impl Fn(&GenerationRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self::with_responder(Responder::Func(Box::new(f)))
    }

    /// Sleep before answering, to exercise deadline handling.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle to the recorded calls, usable after the client is boxed.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn with_responder(responder: Responder) -> Self {
        Self { responder, delay: None, log: CallLog::default() }
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.log.lock().push(request.clone());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match &self.responder {
            Responder::Fixed(reply) => reply.clone(),
            Responder::Script(queue) => queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Transport("mock script exhausted".into()))),
            Responder::Func(f) => f(request),
        }
    }
}

/// Shared record of requests seen by a [`MockLlmClient`].
#[derive(Clone, Default)]
pub struct CallLog {
    inner: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl CallLog {
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.lock().clone()
    }

    pub fn models(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.model.clone()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GenerationRequest>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
