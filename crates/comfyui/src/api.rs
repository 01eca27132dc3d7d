//! HTTP side of the ComfyUI protocol.
//!
//! Queueing, history, image download/upload and queue control are plain
//! request/response calls made with [`reqwest`]. Nothing here touches the
//! WebSocket; completion of a queued prompt is observed in
//! [`processor`](crate::processor).

use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use comfyctl_core::graph::JobGraph;

/// MIME type sent for uploads whose extension is not recognised.
const DEFAULT_UPLOAD_MIME: &str = "image/png";

/// REST client bound to one ComfyUI base URL.
pub struct ComfyUIApi {
    http: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub prompt_id: String,
    /// Queue number assigned by the server.
    pub number: i32,
}

/// Body of a successful `POST /upload/image`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    /// Stored file name; the server renames on conflict unless overwriting.
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub folder_type: String,
}

/// Where an uploaded image should land.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions<'a> {
    pub subfolder: Option<&'a str>,
    /// `input` (server default), `temp` or `output`.
    pub folder_type: Option<&'a str>,
    pub overwrite: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure or an undecodable response body.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl ComfyUIApi {
    /// `api_url` is the server root, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `POST /prompt`. Only enqueues; the result arrives over the
    /// WebSocket addressed to `client_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &JobGraph,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self.http.post(self.endpoint("prompt")).json(&body).send().await?;
        read_json(response).await
    }

    /// `GET /history/{prompt_id}`: a JSON object keyed by the prompt id,
    /// or `{}` if the server does not know it.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let url = self.endpoint(&format!("history/{prompt_id}"));
        let response = self.http.get(url).send().await?;
        read_json(response).await
    }

    /// `GET /view?filename=..&subfolder=..&type=..`, raw bytes.
    pub async fn get_image(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let query = [
            ("filename", filename),
            ("subfolder", subfolder),
            ("type", folder_type),
        ];
        let response = self.http.get(self.endpoint("view")).query(&query).send().await?;

        let bytes = success(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// `POST /upload/image` as multipart: the file in the `image` part,
    /// `overwrite` always, `subfolder` and `type` when set. Failures are
    /// logged, then returned.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &UploadOptions<'_>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        self.send_upload(bytes, filename, options)
            .await
            .inspect_err(|e| {
                tracing::error!(filename, error = %e, "Image upload failed");
            })
    }

    /// `POST /queue` with `{"delete": [prompt_id]}`. Has no effect on a
    /// prompt that is already running.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({ "delete": [prompt_id] });
        let response = self.http.post(self.endpoint("queue")).json(&body).send().await?;
        success(response).await.map(drop)
    }

    /// `POST /interrupt`: stops whatever is running, whoever queued it.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self.http.post(self.endpoint("interrupt")).send().await?;
        success(response).await.map(drop)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }

    async fn send_upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &UploadOptions<'_>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let mime = image::ImageFormat::from_path(filename)
            .map(|format| format.to_mime_type())
            .unwrap_or(DEFAULT_UPLOAD_MIME);
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)?;

        let mut form = Form::new()
            .part("image", part)
            .text("overwrite", options.overwrite.to_string());
        if let Some(subfolder) = options.subfolder {
            form = form.text("subfolder", subfolder.to_string());
        }
        if let Some(folder_type) = options.folder_type {
            form = form.text("type", folder_type.to_string());
        }

        let response = self
            .http
            .post(self.endpoint("upload/image"))
            .multipart(form)
            .send()
            .await?;
        read_json(response).await
    }
}

/// Pass a 2xx response through; turn anything else into
/// [`ComfyUIApiError::ApiError`] carrying the body text.
async fn success(response: Response) -> Result<Response, ComfyUIApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ComfyUIApiError> {
    Ok(success(response).await?.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://host:8188/".into());
        assert_eq!(api.api_url(), "http://host:8188");
        assert_eq!(api.endpoint("history/p1"), "http://host:8188/history/p1");
    }

    #[test]
    fn upload_response_tolerates_missing_fields() {
        let ack: UploadResponse = serde_json::from_str(r#"{"name":"cat.png"}"#).unwrap();
        assert_eq!(ack.name, "cat.png");
        assert!(ack.subfolder.is_empty());
        assert!(ack.folder_type.is_empty());
    }
}
