use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use image::RgbImage;

use crate::{error::ServiceError, model::GenerationParams};

/// An image-to-image engine that is ready to run.
///
/// Implementations own their device resources and must serialize access to them
/// internally; the gateway calls `generate` from many blocking tasks at once.
pub trait Img2ImgPipeline: Send + Sync {
    fn generate(
        &self,
        image: &RgbImage,
        params: &GenerationParams,
    ) -> Result<RgbImage, ServiceError>;
}

/// Turns a checkpoint file into a runnable pipeline.
pub trait PipelineLoader: Send + Sync {
    fn load(&self, checkpoint: &Path) -> Result<Arc<dyn Img2ImgPipeline>, ServiceError>;
}

/// Loader used when the binary is built without an inference backend.
pub struct NoBackend;

impl PipelineLoader for NoBackend {
    fn load(&self, _checkpoint: &Path) -> Result<Arc<dyn Img2ImgPipeline>, ServiceError> {
        Err(ServiceError::Inference(
            "no inference backend compiled in; enable the `tch-backend` feature".into(),
        ))
    }
}

/// Basenames of the checkpoint files in `dir`, sorted lexically.
///
/// Hidden files are skipped and a missing directory lists as empty.
pub fn list_checkpoints(dir: &Path, extension: &str) -> Result<Vec<String>, ServiceError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ServiceError::Scan(format!("{}: {err}", dir.display()))),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ServiceError::Scan(e.to_string()))?;
        let path = entry.path();
        if !path.is_file() || !has_extension(&path, extension) {
            continue;
        }
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.starts_with('.') => names.push(name.to_string()),
            _ => {}
        }
    }
    names.sort();
    Ok(names)
}

/// The checkpoint picked at startup: the first one in lexical order.
pub fn select_checkpoint(dir: &Path, extension: &str) -> Result<Option<PathBuf>, ServiceError> {
    Ok(list_checkpoints(dir, extension)?
        .into_iter()
        .next()
        .map(|name| dir.join(name)))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == extension)
}
