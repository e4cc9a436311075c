use std::{path::PathBuf, sync::Arc};

use tokio::task;
use tracing::{error, info, warn};

use crate::{
    config::{AppConfig, ComputeDevice},
    error::ServiceError,
    imaging,
    model::{
        GenerationParams, ModelState,
        loader::{PipelineLoader, list_checkpoints, select_checkpoint},
    },
};

pub struct ModelRegistry {
    state: ModelState,
    models_dir: PathBuf,
    extension: String,
    device: ComputeDevice,
}

impl ModelRegistry {
    /// Scans the models directory and loads the first checkpoint found.
    ///
    /// Never fails: a missing checkpoint or a failed load leaves the registry unloaded
    /// for the lifetime of the process.
    pub fn initialize(config: &AppConfig, loader: &dyn PipelineLoader) -> Self {
        let state = match select_checkpoint(&config.models_dir, &config.checkpoint_extension) {
            Ok(Some(checkpoint)) => {
                info!(checkpoint = %checkpoint.display(), device = %config.device, "loading checkpoint");
                match loader.load(&checkpoint) {
                    Ok(pipeline) => {
                        info!(checkpoint = %checkpoint.display(), "model loaded");
                        ModelState::Loaded {
                            checkpoint,
                            pipeline,
                        }
                    }
                    Err(err) => {
                        error!(checkpoint = %checkpoint.display(), %err, "failed to load checkpoint");
                        ModelState::Unloaded
                    }
                }
            }
            Ok(None) => {
                warn!(
                    dir = %config.models_dir.display(),
                    extension = %config.checkpoint_extension,
                    "no checkpoints found"
                );
                ModelState::Unloaded
            }
            Err(err) => {
                warn!(%err, "could not scan models directory");
                ModelState::Unloaded
            }
        };

        Self {
            state,
            models_dir: config.models_dir.clone(),
            extension: config.checkpoint_extension.clone(),
            device: config.device,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    /// Basename of the checkpoint the pipeline was built from.
    pub fn loaded_checkpoint(&self) -> Option<String> {
        match &self.state {
            ModelState::Loaded { checkpoint, .. } => checkpoint
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            ModelState::Unloaded => None,
        }
    }

    pub fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        list_checkpoints(&self.models_dir, &self.extension)
    }

    pub fn models_dir_exists(&self) -> bool {
        self.models_dir.is_dir()
    }

    pub fn available_models(&self) -> usize {
        self.list_models().map(|names| names.len()).unwrap_or(0)
    }

    /// Runs one image-to-image generation and returns the PNG-encoded result.
    pub async fn generate(
        &self,
        image: Vec<u8>,
        params: GenerationParams,
    ) -> Result<Vec<u8>, ServiceError> {
        let pipeline = match &self.state {
            ModelState::Loaded { pipeline, .. } => Arc::clone(pipeline),
            ModelState::Unloaded => return Err(ServiceError::ModelNotLoaded),
        };

        info!(
            cfg = params.guidance_scale,
            steps = params.steps,
            strength = params.strength,
            "generating image"
        );

        task::spawn_blocking(move || {
            let input = imaging::prepare_input(&image)?;
            let output = pipeline.generate(&input, &params)?;
            imaging::encode_png(&output)
        })
        .await
        .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))?
    }
}
