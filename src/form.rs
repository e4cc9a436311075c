use std::str::FromStr;

use axum::{
    extract::{Multipart, multipart::MultipartError},
    http::StatusCode,
};
use tracing::debug;

use crate::{error::ServiceError, model::GenerationRequest};

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct Img2ImgForm {
    pub image: UploadedImage,
    pub request: GenerationRequest,
}

/// Which generation fields a caller consumes; the rest are skipped unparsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormScope {
    /// Every field drives local inference.
    Generation,
    /// Only `prompt` and `strength` are forwarded to the remote API.
    Forward,
}

/// Reads the `/img2img` multipart body. Only the `image` part is mandatory.
pub async fn parse_img2img_form(
    mut multipart: Multipart,
    scope: FormScope,
) -> Result<Img2ImgForm, ServiceError> {
    let mut image = None;
    let mut request = GenerationRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let file_name = field.file_name().unwrap_or("image").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let data = field.bytes().await.map_err(multipart_error)?;
            image = Some(UploadedImage {
                file_name,
                content_type,
                data: data.to_vec(),
            });
            continue;
        }

        let value = field.text().await.map_err(multipart_error)?;
        match (name.as_str(), scope) {
            ("prompt", _) => request.prompt = value,
            ("strength", _) => request.strength = parse_field(&name, &value)?,
            ("negative_prompt", FormScope::Generation) => request.negative_prompt = value,
            ("cfg_scale", FormScope::Generation) => {
                request.cfg_scale = parse_field(&name, &value)?
            }
            ("steps", FormScope::Generation) => request.steps = parse_field(&name, &value)?,
            _ => debug!(field = %name, "ignoring form field"),
        }
    }

    let image = image.ok_or_else(|| ServiceError::BadRequest("missing `image` file field".into()))?;
    Ok(Img2ImgForm { image, request })
}

/// Keeps the body-limit rejection distinct from malformed multipart input.
fn multipart_error(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(err.body_text())
    } else {
        ServiceError::BadRequest(err.body_text())
    }
}

/// Blank values count as absent so the defaults apply.
fn parse_field<T: FromStr>(name: &str, value: &str) -> Result<Option<T>, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| ServiceError::BadRequest(format!("`{name}` is not a valid number: {trimmed}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_parsed() {
        assert_eq!(parse_field::<f64>("strength", "0.6").unwrap(), Some(0.6));
        assert_eq!(parse_field::<i64>("steps", " 25 ").unwrap(), Some(25));
    }

    #[test]
    fn blank_numbers_are_absent() {
        assert_eq!(parse_field::<f64>("cfg_scale", "").unwrap(), None);
        assert_eq!(parse_field::<i64>("steps", "   ").unwrap(), None);
    }

    #[test]
    fn garbage_numbers_are_bad_requests() {
        let err = parse_field::<i64>("steps", "twenty").unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
        assert!(err.to_string().contains("steps"));
        assert!(parse_field::<i64>("steps", "2.5").is_err());
    }
}
