use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use img2img_gateway::{
    AppConfig, GatewayMode, ModelRegistry, PipelineLoader, RemoteClient, build_proxy_router,
    build_router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(mode = ?config.mode, device = %config.device, "starting img2img gateway");

    let router = match config.mode {
        GatewayMode::Local => {
            let loader = pipeline_loader(config.as_ref());
            let registry = Arc::new(ModelRegistry::initialize(config.as_ref(), loader.as_ref()));
            build_router(config.clone(), registry)
        }
        GatewayMode::Proxy => proxy_router(config.clone())?,
    };

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(feature = "tch-backend")]
fn pipeline_loader(config: &AppConfig) -> Box<dyn PipelineLoader> {
    Box::new(img2img_gateway::model::tch_backend::TorchPipelineLoader::new(config))
}

#[cfg(not(feature = "tch-backend"))]
fn pipeline_loader(_config: &AppConfig) -> Box<dyn PipelineLoader> {
    Box::new(img2img_gateway::model::NoBackend)
}

fn proxy_router(config: Arc<AppConfig>) -> anyhow::Result<Router> {
    let remote = config
        .remote
        .as_ref()
        .context("proxy mode requires remote api settings")?;
    let client = Arc::new(RemoteClient::new(remote)?);
    Ok(build_proxy_router(config, client))
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
