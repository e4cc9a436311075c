//! Client for the hosted img2img API used in proxy mode.

use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{config::RemoteConfig, error::ServiceError, form::UploadedImage};

pub struct RemoteClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model_id: String,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if config.api_key.is_none() {
            warn!("REMOTE_API_KEY is not set, forwarding requests without credentials");
        }
        info!(endpoint = %config.endpoint, model_id = %config.model_id, "remote client configured");

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model_id: config.model_id.clone(),
        })
    }

    /// Sends the upload to the remote API and returns its JSON body untouched,
    /// whatever status code came with it.
    pub async fn forward(
        &self,
        image: UploadedImage,
        prompt: &str,
        strength: f64,
    ) -> Result<Value, ServiceError> {
        let part = Part::bytes(image.data)
            .file_name(image.file_name)
            .mime_str(&image.content_type)
            .map_err(|e| ServiceError::BadRequest(format!("invalid image content type: {e}")))?;
        let form = Form::new()
            .part("image", part)
            .text("prompt", prompt.to_string())
            .text("strength", strength.to_string())
            .text("model_id", self.model_id.clone());

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(endpoint = %self.endpoint, "forwarding img2img request");
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "remote api returned an error status, relaying body");
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ServiceError::Upstream(format!("remote api returned {status} with a non-JSON body: {e}")))
    }
}
