//! The request cycle behind the page: one draft, one state, at most one call
//! in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::common::{GenerationRequest, GenerationResult};
use crate::error::{CycleError, ErrorKind, GeneratorError, Result};
use crate::models::PoemGenerator;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestState {
    Idle,
    Generating,
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

impl RequestState {
    pub fn is_generating(&self) -> bool {
        matches!(self, Self::Generating)
    }
}

/// What a front-end needs to render the page.
///
/// `error` is set exactly when `state` is `Failed`. `result` is the last
/// successful poem and survives later failures until cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub draft: GenerationRequest,
    pub state: RequestState,
    pub result: Option<String>,
    pub error: Option<String>,
}

enum Transition {
    Rejected(GenerationRequest, ErrorKind, String),
    Started(u64, GenerationRequest),
    Resolved(GenerationResult),
    Failed(ErrorKind, String),
    Cleared,
    Cancelled,
}

struct Inner {
    draft: GenerationRequest,
    last_request: Option<GenerationRequest>,
    state: RequestState,
    result: Option<GenerationResult>,
    in_flight: Option<u64>,
    next_call: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            draft: GenerationRequest::default(),
            last_request: None,
            state: RequestState::Idle,
            result: None,
            in_flight: None,
            next_call: 0,
        }
    }

    /// Every state change goes through here.
    fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Rejected(request, kind, message) => {
                self.draft = request;
                self.state = RequestState::Failed { kind, message };
            }
            Transition::Started(call, request) => {
                self.draft = request.clone();
                self.last_request = Some(request);
                self.in_flight = Some(call);
                self.state = RequestState::Generating;
            }
            Transition::Resolved(result) => {
                self.in_flight = None;
                self.result = Some(result);
                self.state = RequestState::Succeeded;
            }
            Transition::Failed(kind, message) => {
                self.in_flight = None;
                self.state = RequestState::Failed { kind, message };
            }
            Transition::Cleared => {
                self.draft.prompt.clear();
                self.result = None;
                // An in-flight call keeps running and still reports back.
                if self.in_flight.is_none() {
                    self.state = RequestState::Idle;
                }
            }
            Transition::Cancelled => {
                self.in_flight = None;
                self.state = RequestState::Idle;
            }
        }
    }

    fn snapshot(&self) -> CycleSnapshot {
        let error = match &self.state {
            RequestState::Failed { message, .. } => Some(message.clone()),
            _ => None,
        };
        CycleSnapshot {
            draft: self.draft.clone(),
            state: self.state.clone(),
            result: self.result.as_ref().map(|r| r.text.clone()),
            error,
        }
    }
}

pub struct GenerationCycle {
    generator: Arc<dyn PoemGenerator>,
    timeout: Duration,
    inner: Mutex<Inner>,
    cancel: Notify,
}

impl GenerationCycle {
    pub fn new(generator: Arc<dyn PoemGenerator>) -> Self {
        Self {
            generator,
            timeout: DEFAULT_TIMEOUT,
            inner: Mutex::new(Inner::new()),
            cancel: Notify::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        self.lock().snapshot()
    }

    /// Validates `request` and, if it passes, makes exactly one call to the
    /// generator.
    ///
    /// Dropping the returned future abandons the call and returns the cycle to
    /// `Idle`.
    pub async fn submit(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let (call, cancelled) = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() {
                log::warn!("Rejecting submission while a poem is being generated");
                return Err(CycleError::Busy);
            }
            if let Err(err) = request.validate() {
                let err = CycleError::from(err);
                log::info!("Invalid request: {}", err);
                inner.apply(Transition::Rejected(request, err.kind(), err.to_string()));
                return Err(err);
            }
            inner.next_call += 1;
            let call = inner.next_call;
            inner.apply(Transition::Started(call, request.clone()));
            // Registered under the lock: only a cancel of this call can wake it.
            (call, self.cancel.notified())
        };
        let _abandon = AbandonOnDrop { cycle: self, call };

        log::info!(
            "Generating poem #{} (max_length={}, temperature={}, top_p={})",
            call,
            request.max_length,
            request.temperature,
            request.top_p
        );

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(self.timeout, self.generator.generate(&request)) => outcome,
            _ = cancelled => {
                log::info!("Poem #{} cancelled", call);
                return Err(CycleError::Cancelled);
            }
        };

        let result = match outcome {
            Ok(Ok(prediction)) => match prediction.first_text() {
                Some(text) => Ok(GenerationResult::new(text.to_string())),
                None => Err(CycleError::EmptyResponse),
            },
            Ok(Err(err)) => Err(CycleError::Transport(err)),
            Err(_) => Err(CycleError::Transport(GeneratorError::Timeout(self.timeout))),
        };

        // Settled under its own lock scope; `_abandon` locks again on drop.
        {
            let mut inner = self.lock();
            if inner.in_flight != Some(call) {
                log::info!("Dropping outcome of cancelled poem #{}", call);
                return Err(CycleError::Cancelled);
            }
            match &result {
                Ok(generated) => {
                    log::info!("Poem #{} generated ({} chars)", call, generated.text.len());
                    inner.apply(Transition::Resolved(generated.clone()));
                }
                Err(err) => {
                    match err {
                        CycleError::Transport(cause) => {
                            log::error!("Poem #{} failed: {}", call, cause)
                        }
                        other => log::warn!("Poem #{} failed: {}", call, other),
                    }
                    inner.apply(Transition::Failed(err.kind(), err.to_string()));
                }
            }
        }
        result
    }

    /// Submits the last request sent, or the current draft if nothing was
    /// sent yet.
    pub async fn regenerate(&self) -> Result<GenerationResult> {
        let request = {
            let inner = self.lock();
            inner
                .last_request
                .clone()
                .unwrap_or_else(|| inner.draft.clone())
        };
        self.submit(request).await
    }

    pub fn clear(&self) -> CycleSnapshot {
        let mut inner = self.lock();
        inner.apply(Transition::Cleared);
        inner.snapshot()
    }

    /// Abandons the in-flight call, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.in_flight.is_none() {
            return false;
        }
        inner.apply(Transition::Cancelled);
        self.cancel.notify_waiters();
        true
    }
}

/// Returns the cycle to `Idle` if `call` is still in flight when the
/// submitting future goes away.
struct AbandonOnDrop<'a> {
    cycle: &'a GenerationCycle,
    call: u64,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        let mut inner = self.cycle.lock();
        if inner.in_flight == Some(self.call) {
            log::warn!("Poem #{} abandoned before it settled", self.call);
            inner.apply(Transition::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_resets_prompt_result_and_error() {
        let mut inner = Inner::new();
        inner.result = Some(GenerationResult::new("old".to_string()));
        inner.apply(Transition::Failed(
            ErrorKind::EmptyResponse,
            "nothing".to_string(),
        ));
        inner.apply(Transition::Cleared);

        let snapshot = inner.snapshot();
        assert_eq!(snapshot.draft.prompt, "");
        assert_eq!(snapshot.result, None);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.state, RequestState::Idle);
    }

    #[test]
    fn clear_during_a_call_keeps_generating() {
        let mut inner = Inner::new();
        inner.apply(Transition::Started(1, GenerationRequest::default()));
        inner.apply(Transition::Cleared);
        assert!(inner.state.is_generating());
        assert_eq!(inner.in_flight, Some(1));
    }

    #[test]
    fn error_is_only_reported_in_failed_state() {
        let mut inner = Inner::new();
        inner.apply(Transition::Failed(ErrorKind::Transport, "down".to_string()));
        assert_eq!(inner.snapshot().error.as_deref(), Some("down"));

        inner.apply(Transition::Started(2, GenerationRequest::default()));
        assert_eq!(inner.snapshot().error, None);

        inner.apply(Transition::Resolved(GenerationResult::new("ok".to_string())));
        let snapshot = inner.snapshot();
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.result.as_deref(), Some("ok"));
    }

    #[test]
    fn state_serializes_with_a_status_tag() {
        let failed = RequestState::Failed {
            kind: ErrorKind::Validation,
            message: "Please enter a prompt.".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&failed).expect("serialize"),
            serde_json::json!({
                "status": "failed",
                "kind": "validation",
                "message": "Please enter a prompt."
            })
        );
        assert_eq!(
            serde_json::to_value(RequestState::Generating).expect("serialize"),
            serde_json::json!({"status": "generating"})
        );
    }
}
