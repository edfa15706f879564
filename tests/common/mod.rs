//! Shared test helpers and a stub generator.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use wordweaver::common::{GenerationRequest, Prediction};
use wordweaver::error::GeneratorError;
use wordweaver::models::PoemGenerator;

pub enum Reply {
    Data(Prediction),
    Fail(GeneratorError),
    /// Never settles.
    Hang,
    /// Settles after a delay.
    Delayed(Duration, Prediction),
}

/// A generator that plays back queued replies and records what it was sent.
#[derive(Default)]
pub struct StubGenerator {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl StubGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue(&self, reply: Reply) -> &Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn queue_text(&self, text: &str) -> &Self {
        self.queue(Reply::Data(Prediction::new(vec![json!(text)])))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PoemGenerator for StubGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Prediction, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no reply queued");
        match reply {
            Reply::Data(prediction) => Ok(prediction),
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending().await,
            Reply::Delayed(delay, prediction) => {
                tokio::time::sleep(delay).await;
                Ok(prediction)
            }
        }
    }
}

pub fn stars_above() -> GenerationRequest {
    GenerationRequest::new("Stars above", 200, 0.9, 0.95)
}
