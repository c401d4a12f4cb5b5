/// Scripted gateway for tests and offline runs.
///
/// Answers come from a responder closure (or a fixed queue). Every request is
/// recorded so tests can assert on call counts, stages and prompt contents.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{LlmError, LlmGateway, LlmRequest, Stage};

type Responder = Box<dyn Fn(&LlmRequest) -> Result<Value, LlmError> + Send + Sync>;
type Latency = Box<dyn Fn(&LlmRequest) -> Duration + Send + Sync>;

/// A gateway whose answers are produced by a closure.
pub struct ScriptedGateway {
    responder: Responder,
    latency: Option<Latency>,
    calls: Mutex<Vec<LlmRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGateway {
    /// Answer every request with `responder(request)`.
    #[must_use]
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<Value, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answer requests in arrival order; a transport error once exhausted.
    #[must_use]
    pub fn from_queue(responses: impl IntoIterator<Item = Value>) -> Self {
        let queue = Mutex::new(responses.into_iter().collect::<VecDeque<_>>());
        Self::new(move |_| {
            queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .ok_or_else(|| LlmError::Transport("scripted responses exhausted".to_string()))
        })
    }

    /// Delay each answer by `latency(request)`.
    #[must_use]
    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&LlmRequest) -> Duration + Send + Sync + 'static,
    {
        self.latency = Some(Box::new(latency));
        self
    }

    /// All requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<LlmRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.stage == stage)
            .count()
    }

    /// Highest number of requests that were pending at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn generate(&self, request: &LlmRequest) -> Result<Value, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let pending = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(pending, Ordering::SeqCst);
        if let Some(latency) = &self.latency {
            tokio::time::sleep(latency(request)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.responder)(request)
    }
}
