use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

pub const MAX_LENGTH_RANGE: RangeInclusive<u32> = 50..=500;
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.1..=2.0;
pub const TOP_P_RANGE: RangeInclusive<f64> = 0.1..=1.0;

pub const DEFAULT_PROMPT: &str = "Stars above";
pub const DEFAULT_MAX_LENGTH: u32 = 200;
pub const DEFAULT_TEMPERATURE: f64 = 0.9;
pub const DEFAULT_TOP_P: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_max_length")]
    pub max_length: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

fn default_max_length() -> u32 {
    DEFAULT_MAX_LENGTH
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_length: u32, temperature: f64, top_p: f64) -> Self {
        Self {
            prompt: prompt.into(),
            max_length,
            temperature,
            top_p,
        }
    }

    /// Same parameters, different prompt.
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }

    /// Checks everything that can be rejected without talking to the service.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if !MAX_LENGTH_RANGE.contains(&self.max_length) {
            return Err(ValidationError::out_of_range(
                "Max length",
                MAX_LENGTH_RANGE.start(),
                MAX_LENGTH_RANGE.end(),
            ));
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(ValidationError::out_of_range(
                "Temperature",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end(),
            ));
        }
        if !TOP_P_RANGE.contains(&self.top_p) {
            return Err(ValidationError::out_of_range(
                "Top-p",
                TOP_P_RANGE.start(),
                TOP_P_RANGE.end(),
            ));
        }
        Ok(())
    }
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROMPT,
            DEFAULT_MAX_LENGTH,
            DEFAULT_TEMPERATURE,
            DEFAULT_TOP_P,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GenerationResult {
    pub text: String,
}

impl GenerationResult {
    pub fn new(text: String) -> Self {
        Self { text }
    }
}

/// Output array of a remote prediction, as returned by the service.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Prediction {
    pub data: Vec<Value>,
}

impl Prediction {
    pub fn new(data: Vec<Value>) -> Self {
        Self { data }
    }

    /// The first output, if it is a non-empty string.
    pub fn first_text(&self) -> Option<&str> {
        match self.data.first() {
            Some(Value::String(text)) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}
