//! Client for a model hosted as a Gradio Space.
//!
//! A prediction is two requests: a POST that queues the call and returns an
//! event id, then a GET on that id that streams server-sent events until the
//! call completes or errors.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::common::{GenerationRequest, Prediction};
use crate::error::GeneratorError;
use crate::models::PoemGenerator;

pub const DEFAULT_SPACE: &str = "NimalanNatarajan/poetry-generator";
pub const DEFAULT_API_NAME: &str = "/generate_poem";

const API_PREFIX: &str = "gradio_api/call";

/// Longest event-stream line accepted before giving up on the call.
const MAX_LINE_BYTES: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct GradioConfig {
    pub space: String,
    /// Overrides the host derived from `space`.
    pub endpoint: Option<String>,
    pub api_name: String,
    pub hf_token: Option<String>,
}

impl GradioConfig {
    pub fn new(space: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            endpoint: None,
            api_name: DEFAULT_API_NAME.to_string(),
            hf_token: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => space_host(&self.space),
        }
    }
}

impl Default for GradioConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SPACE)
    }
}

/// `owner/name` -> `https://owner-name.hf.space`
pub fn space_host(space: &str) -> String {
    let subdomain = space.trim().to_lowercase().replace(['/', '_', '.'], "-");
    format!("https://{subdomain}.hf.space")
}

#[derive(Debug, Serialize)]
struct CallRequest {
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    event_id: String,
}

pub struct GradioSpace {
    config: GradioConfig,
    http: reqwest::Client,
}

impl GradioSpace {
    pub fn new(config: GradioConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: GradioConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn call_url(&self) -> String {
        format!(
            "{}/{API_PREFIX}/{}",
            self.config.base_url(),
            self.config.api_name.trim_start_matches('/')
        )
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.hf_token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn queue(&self, request: &GenerationRequest) -> Result<String, GeneratorError> {
        let body = CallRequest {
            data: vec![
                json!(request.prompt),
                json!(request.max_length),
                json!(request.temperature),
                json!(request.top_p),
            ],
        };

        let response = self
            .authorize(self.http.post(self.call_url()))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let CallResponse { event_id } = response.json().await?;

        log::debug!("Queued {} as event {}", self.config.api_name, event_id);
        Ok(event_id)
    }

    async fn await_result(&self, event_id: &str) -> Result<Prediction, GeneratorError> {
        let url = format!("{}/{event_id}", self.call_url());
        let response = self.authorize(self.http.get(url)).send().await?;
        let response = check_status(response).await?;

        let mut body = response.bytes_stream();
        let mut parser = SseParser::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for event in parser.feed(&chunk)? {
                if let Some(outcome) = handle_event(event) {
                    return outcome;
                }
            }
        }
        for event in parser.finish() {
            if let Some(outcome) = handle_event(event) {
                return outcome;
            }
        }

        Err(GeneratorError::Protocol(
            "event stream ended before the call completed".to_string(),
        ))
    }
}

#[async_trait]
impl PoemGenerator for GradioSpace {
    async fn generate(&self, request: &GenerationRequest) -> Result<Prediction, GeneratorError> {
        let event_id = self.queue(request).await?;
        self.await_result(&event_id).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GeneratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GeneratorError::Status {
        status: status.as_u16(),
        body,
    })
}

/// `None` keeps reading; `Some` ends the call.
fn handle_event(event: SseEvent) -> Option<Result<Prediction, GeneratorError>> {
    match event.event.as_str() {
        "complete" => Some(
            serde_json::from_str::<Vec<Value>>(&event.data)
                .map(Prediction::new)
                .map_err(|err| GeneratorError::Protocol(format!("bad completion payload: {err}"))),
        ),
        "error" => Some(Err(GeneratorError::Remote(remote_error_message(&event.data)))),
        "generating" | "heartbeat" => None,
        other => {
            log::debug!("Ignoring event {other:?}");
            None
        }
    }
}

fn remote_error_message(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(message)) => message,
        Ok(Value::Null) => "the Space reported an error".to_string(),
        _ if data.trim().is_empty() => "the Space reported an error".to_string(),
        _ => data.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental server-sent events parser; chunks may split lines anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, GeneratorError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            self.scanned = start;
            if let Some(event) = self.line(line.trim_end_matches('\r')) {
                events.push(event);
            }
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        if self.buffer.len() > MAX_LINE_BYTES {
            return Err(GeneratorError::Protocol(format!(
                "event stream line longer than {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(events)
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let mut events = Vec::new();
        if !rest.is_empty() {
            let line = String::from_utf8_lossy(&rest);
            events.extend(self.line(line.trim_end_matches('\r')));
        }
        events.extend(self.line(""));
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
