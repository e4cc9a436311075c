pub mod config;
pub mod error;
pub mod form;
pub mod imaging;
pub mod model;
pub mod proxy;
pub mod server;

pub use config::{AppConfig, GatewayMode};
pub use model::{GenerationParams, GenerationRequest, Img2ImgPipeline, ModelRegistry, PipelineLoader};
pub use proxy::RemoteClient;
pub use server::{build_proxy_router, build_router};
