#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, header},
    response::Response,
};
use image::{ImageFormat, Rgb, RgbImage};
use img2img_gateway::{
    AppConfig, GenerationParams, Img2ImgPipeline, ModelRegistry, PipelineLoader, build_router,
    error::ServiceError,
};
use parking_lot::Mutex;
use serde_json::Value;

pub const BOUNDARY: &str = "img2img-test-boundary";

/// Returns its input unchanged and remembers the parameters it was called with.
#[derive(Default)]
pub struct RecordingPipeline {
    pub seen: Mutex<Vec<GenerationParams>>,
    pub failure: Option<String>,
}

impl Img2ImgPipeline for RecordingPipeline {
    fn generate(
        &self,
        image: &RgbImage,
        params: &GenerationParams,
    ) -> Result<RgbImage, ServiceError> {
        self.seen.lock().push(params.clone());
        match &self.failure {
            Some(msg) => Err(ServiceError::Inference(msg.clone())),
            None => Ok(image.clone()),
        }
    }
}

pub struct StubLoader {
    pub loaded: Mutex<Vec<PathBuf>>,
    pub pipeline: Arc<RecordingPipeline>,
    pub fail: bool,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::with_pipeline(RecordingPipeline::default())
    }

    pub fn with_pipeline(pipeline: RecordingPipeline) -> Self {
        Self {
            loaded: Mutex::new(Vec::new()),
            pipeline: Arc::new(pipeline),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl PipelineLoader for StubLoader {
    fn load(&self, checkpoint: &Path) -> Result<Arc<dyn Img2ImgPipeline>, ServiceError> {
        self.loaded.lock().push(checkpoint.to_path_buf());
        if self.fail {
            return Err(ServiceError::Inference("corrupt checkpoint".into()));
        }
        Ok(self.pipeline.clone() as Arc<dyn Img2ImgPipeline>)
    }
}

pub fn config_with(pairs: &[(&str, &str)]) -> AppConfig {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub fn local_config(models_dir: &Path) -> AppConfig {
    config_with(&[
        ("MODELS_DIR", models_dir.to_str().unwrap()),
        ("DEVICE", "cpu"),
    ])
}

pub fn local_app(models_dir: &Path, loader: &StubLoader) -> (Router, Arc<ModelRegistry>) {
    local_app_with(local_config(models_dir), loader)
}

pub fn local_app_with(config: AppConfig, loader: &StubLoader) -> (Router, Arc<ModelRegistry>) {
    let config = Arc::new(config);
    let registry = Arc::new(ModelRegistry::initialize(config.as_ref(), loader));
    (build_router(config, registry.clone()), registry)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn multipart_body(fields: &[(&str, &str)], image: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(bytes) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"input.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn img2img_request(fields: &[(&str, &str)], image: Option<&[u8]>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/img2img")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(fields, image)))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
