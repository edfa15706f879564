pub mod client;
pub mod common;
pub mod cycle;
pub mod error;
pub mod models;
pub mod server;

pub use common::{GenerationRequest, GenerationResult, Prediction};
pub use cycle::{CycleSnapshot, GenerationCycle, RequestState};
pub use error::{CycleError, ErrorKind, GeneratorError, ValidationError};
pub use models::{GradioConfig, GradioSpace, PoemGenerator};
