pub mod gradio;

use async_trait::async_trait;

use crate::common::{GenerationRequest, Prediction};
use crate::error::GeneratorError;

pub use gradio::{GradioConfig, GradioSpace};

/// Something that turns a request into a remote prediction.
///
/// Implementations only move bytes; deciding whether the prediction holds a
/// usable poem is left to the caller.
#[async_trait]
pub trait PoemGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Prediction, GeneratorError>;
}
