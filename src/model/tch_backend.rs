//! LibTorch img2img backend.
//!
//! The denoising loop lives in a TorchScript pipeline graph exported ahead of time.
//! At startup the graph's parameters are overwritten with the tensors stored in the
//! selected `.safetensors` checkpoint, so one graph serves every compatible checkpoint.
//!
//! Graph calling convention:
//! `forward(image, prompt_ids, negative_ids, strength, guidance_scale, steps) -> image`
//! where images are `[1, 3, H, W]` in `[-1, 1]` and token ids are `[1, 77]` int64.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use image::RgbImage;
use parking_lot::Mutex;
use tch::{CModule, Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::{
    config::{AppConfig, ComputeDevice},
    error::ServiceError,
    model::{GenerationParams, Img2ImgPipeline, PipelineLoader},
};

const CONTEXT_LENGTH: usize = 77;
const END_OF_TEXT: &str = "<|endoftext|>";
const FALLBACK_PAD_ID: u32 = 49407;

pub struct TorchPipelineLoader {
    module_path: PathBuf,
    tokenizer_path: PathBuf,
    device: ComputeDevice,
}

impl TorchPipelineLoader {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            module_path: config.pipeline_module_path.clone(),
            tokenizer_path: config.tokenizer_path.clone(),
            device: config.device,
        }
    }
}

impl PipelineLoader for TorchPipelineLoader {
    fn load(&self, checkpoint: &Path) -> Result<Arc<dyn Img2ImgPipeline>, ServiceError> {
        for artifact in [&self.module_path, &self.tokenizer_path] {
            if !artifact.exists() {
                return Err(ServiceError::Inference(format!(
                    "pipeline artifact missing: {}",
                    artifact.display()
                )));
            }
        }

        let tokenizer = Tokenizer::from_file(&self.tokenizer_path)
            .map_err(|e| ServiceError::Inference(format!("tokenizer: {e}")))?;
        let pad_id = tokenizer.token_to_id(END_OF_TEXT).unwrap_or(FALLBACK_PAD_ID) as i64;

        let device: Device = self.device.into();
        // half precision only pays off on the GPU
        let kind = if self.device.is_gpu() {
            Kind::Half
        } else {
            Kind::Float
        };

        let mut module = CModule::load_on_device(&self.module_path, device)
            .map_err(|e| ServiceError::Inference(e.to_string()))?;
        let copied = load_checkpoint_weights(&module, checkpoint)?;
        module.to(device, kind, false);
        module.set_eval();

        info!(
            checkpoint = %checkpoint.display(),
            tensors = copied,
            device = %self.device,
            dtype = ?kind,
            "pipeline ready"
        );

        Ok(Arc::new(TorchPipeline {
            module: Mutex::new(module),
            tokenizer,
            pad_id,
            device,
            kind,
        }))
    }
}

/// Copies every checkpoint tensor whose name matches a graph parameter.
fn load_checkpoint_weights(module: &CModule, checkpoint: &Path) -> Result<usize, ServiceError> {
    let tensors: HashMap<String, Tensor> = Tensor::read_safetensors(checkpoint)
        .map_err(|e| ServiceError::Inference(format!("reading checkpoint: {e}")))?
        .into_iter()
        .collect();
    let params = module
        .named_parameters()
        .map_err(|e| ServiceError::Inference(e.to_string()))?;

    let mut copied = 0;
    let mut missing = 0;
    no_grad(|| {
        for (name, mut param) in params {
            let Some(source) = tensors.get(&name) else {
                missing += 1;
                continue;
            };
            if source.size() != param.size() {
                return Err(ServiceError::Inference(format!(
                    "shape mismatch for `{name}`: checkpoint {:?}, pipeline {:?}",
                    source.size(),
                    param.size()
                )));
            }
            param
                .f_copy_(source)
                .map_err(|e| ServiceError::Inference(e.to_string()))?;
            copied += 1;
        }
        Ok(())
    })?;

    if copied == 0 {
        return Err(ServiceError::Inference(format!(
            "checkpoint {} shares no tensors with the pipeline graph",
            checkpoint.display()
        )));
    }
    if missing > 0 {
        warn!(missing, "pipeline parameters absent from checkpoint, keeping exported values");
    }
    Ok(copied)
}

pub struct TorchPipeline {
    module: Mutex<CModule>,
    tokenizer: Tokenizer,
    pad_id: i64,
    device: Device,
    kind: Kind,
}

impl TorchPipeline {
    fn encode_prompt(&self, text: &str) -> Result<Tensor, ServiceError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ServiceError::Inference(format!("tokenizer: {e}")))?;
        let mut ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(CONTEXT_LENGTH)
            .map(|&id| id as i64)
            .collect();
        ids.resize(CONTEXT_LENGTH, self.pad_id);

        Ok(Tensor::from_slice(&ids)
            .reshape([1, CONTEXT_LENGTH as i64])
            .to_device(self.device))
    }

    fn image_to_tensor(&self, image: &RgbImage) -> Tensor {
        let (width, height) = image.dimensions();
        let pixels = Tensor::from_slice(image.as_raw())
            .reshape([height as i64, width as i64, 3])
            .permute([2, 0, 1])
            .unsqueeze(0)
            .to_kind(Kind::Float);
        (pixels / 127.5 - 1.0)
            .to_device(self.device)
            .to_kind(self.kind)
    }
}

impl Img2ImgPipeline for TorchPipeline {
    fn generate(
        &self,
        image: &RgbImage,
        params: &GenerationParams,
    ) -> Result<RgbImage, ServiceError> {
        let prompt_ids = self.encode_prompt(&params.prompt)?;
        let negative_ids = self.encode_prompt(&params.negative_prompt)?;
        let start = Instant::now();

        let output = no_grad(|| {
            let input = self.image_to_tensor(image);
            let module = self.module.lock();
            module
                .forward_is(&[
                    IValue::Tensor(input),
                    IValue::Tensor(prompt_ids),
                    IValue::Tensor(negative_ids),
                    IValue::Double(params.strength),
                    IValue::Double(params.guidance_scale),
                    IValue::Int(params.steps as i64),
                ])
                .map_err(|e| ServiceError::Inference(e.to_string()))
        })?;

        // Pipelines may return the images alone or a tuple led by them.
        let images = match output {
            IValue::Tensor(t) => t,
            IValue::Tuple(ref items) | IValue::GenericList(ref items) => match items.first() {
                Some(IValue::Tensor(t)) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Inference(
                        "expected a tensor as first pipeline output".into(),
                    ));
                }
            },
            _ => {
                return Err(ServiceError::Inference(
                    "unexpected pipeline output format".into(),
                ));
            }
        };

        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "pipeline finished");
        tensor_to_image(&images)
    }
}

/// Converts the first image of a `[N, 3, H, W]` (or `[3, H, W]`) batch in `[-1, 1]` to RGB8.
fn tensor_to_image(output: &Tensor) -> Result<RgbImage, ServiceError> {
    let size = output.size();
    let (first, height, width) = match size.as_slice() {
        [n, 3, h, w] if *n > 0 => (output.get(0), *h, *w),
        [3, h, w] => (output.shallow_clone(), *h, *w),
        other => {
            return Err(ServiceError::Inference(format!(
                "pipeline returned tensor of shape {other:?}, expected [N, 3, H, W]"
            )));
        }
    };

    let pixels = ((first.to_kind(Kind::Float).clamp(-1.0, 1.0) + 1.0) * 127.5)
        .round()
        .to_kind(Kind::Uint8)
        .to_device(Device::Cpu)
        .permute([1, 2, 0])
        .contiguous()
        .flatten(0, -1);
    let raw = Vec::<u8>::try_from(&pixels).map_err(|e| ServiceError::Inference(e.to_string()))?;

    RgbImage::from_raw(width as u32, height as u32, raw)
        .ok_or_else(|| ServiceError::Inference("pipeline output has wrong pixel count".into()))
}
