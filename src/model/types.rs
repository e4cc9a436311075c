use std::{path::PathBuf, sync::Arc};

use crate::{config::GenerationDefaults, error::ServiceError, model::Img2ImgPipeline};

/// Raw generation fields as submitted by the client; `None` means the field was absent.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub cfg_scale: Option<f64>,
    pub steps: Option<i64>,
    pub strength: Option<f64>,
}

/// Fully resolved parameters handed to the inference pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub guidance_scale: f64,
    pub steps: u32,
    pub strength: f64,
}

impl GenerationRequest {
    /// Substitutes defaults for missing or empty fields and checks value ranges.
    pub fn resolve(self, defaults: &GenerationDefaults) -> Result<GenerationParams, ServiceError> {
        let prompt = if self.prompt.is_empty() {
            defaults.prompt.clone()
        } else {
            self.prompt
        };
        let negative_prompt = if self.negative_prompt.is_empty() {
            defaults.negative_prompt.clone()
        } else {
            self.negative_prompt
        };

        let guidance_scale = self.cfg_scale.unwrap_or(defaults.cfg_scale);
        if !guidance_scale.is_finite() {
            return Err(ServiceError::BadRequest(
                "cfg_scale must be a finite number".into(),
            ));
        }

        let strength = self.strength.unwrap_or(defaults.strength);
        if !(0.0..=1.0).contains(&strength) {
            return Err(ServiceError::BadRequest(format!(
                "strength must be between 0 and 1, got {strength}"
            )));
        }

        let steps = self.steps.unwrap_or(defaults.steps);
        if steps <= 0 {
            return Err(ServiceError::BadRequest(format!(
                "steps must be greater than 0, got {steps}"
            )));
        }
        let steps = u32::try_from(steps)
            .map_err(|_| ServiceError::BadRequest(format!("steps is too large: {steps}")))?;

        Ok(GenerationParams {
            prompt,
            negative_prompt,
            guidance_scale,
            steps,
            strength,
        })
    }
}

/// Whether a pipeline was loaded at startup. Decided once, never changes afterwards.
#[derive(Clone)]
pub enum ModelState {
    Unloaded,
    Loaded {
        checkpoint: PathBuf,
        pipeline: Arc<dyn Img2ImgPipeline>,
    },
}

impl ModelState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelState::Loaded { .. })
    }
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Unloaded => f.write_str("Unloaded"),
            ModelState::Loaded { checkpoint, .. } => f
                .debug_struct("Loaded")
                .field("checkpoint", checkpoint)
                .finish_non_exhaustive(),
        }
    }
}
