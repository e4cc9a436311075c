mod loader;
mod registry;
mod types;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use loader::{Img2ImgPipeline, NoBackend, PipelineLoader, list_checkpoints, select_checkpoint};
pub use registry::ModelRegistry;
pub use types::{GenerationParams, GenerationRequest, ModelState};
