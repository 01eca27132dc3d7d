//! A client session against one ComfyUI server.
//!
//! [`ComfyUISession`] owns the HTTP client, a client id generated once at
//! construction, and at most one WebSocket connection.  The socket is
//! opened lazily by the first generation and reused by later ones; a
//! socket that errors or closes is dropped and reopened on the next call.
//!
//! Generation runs `Idle -> AwaitingExecution -> Complete`, ending early in
//! `Failed` when the server reports an error and in `TimedOut` when the
//! configured wait timeout elapses.

use std::time::Duration;

use image::DynamicImage;

use comfyctl_core::config::ClientConfig;
use comfyctl_core::error::CoreError;
use comfyctl_core::graph::JobGraph;
use comfyctl_core::template::{parse_template, ParsedTemplate};

use crate::api::{ComfyUIApi, ComfyUIApiError, UploadOptions, UploadResponse};
use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};
use crate::messages::ImageRef;
use crate::processor::{await_completion, Completion};

/// Result of a successful generation.
#[derive(Debug)]
pub struct Generation {
    pub prompt_id: String,
    /// Seed substituted into the template, if it had a placeholder.
    pub seed: Option<u32>,
    /// Server-side references, in server order.
    pub outputs: Vec<ImageRef>,
    /// Decoded images, same order as `outputs`.
    pub images: Vec<DynamicImage>,
}

/// A session bound to one ComfyUI server.
pub struct ComfyUISession {
    client_id: String,
    api: ComfyUIApi,
    client: ComfyUIClient,
    wait_timeout: Option<Duration>,
    connection: Option<ComfyUIConnection>,
}

impl ComfyUISession {
    /// Create a session.  No network traffic happens until first use.
    pub fn new(config: &ClientConfig) -> Self {
        let client_id = uuid::Uuid::new_v4().to_string();
        Self {
            api: ComfyUIApi::new(config.api_url.clone()),
            client: ComfyUIClient::new(config.ws_url.clone(), client_id.clone()),
            client_id,
            wait_timeout: config.wait_timeout,
            connection: None,
        }
    }

    /// Identifier this session presents to the server.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether a WebSocket connection is currently held. A socket the
    /// server closed while idle still counts until the next generation
    /// notices and replaces it.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Queue a job graph.  Returns the server-assigned prompt id without
    /// waiting for execution.
    pub async fn submit_job(&self, graph: &JobGraph) -> Result<String, ComfyUIApiError> {
        let response = self.api.submit_workflow(graph, &self.client_id).await?;
        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_number = response.number,
            "Workflow submitted to ComfyUI",
        );
        Ok(response.prompt_id)
    }

    /// Stored history record for a prompt, keyed by prompt id.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        self.api.get_history(prompt_id).await
    }

    /// Raw bytes of a server-side image.
    pub async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        self.api.get_image(filename, subfolder, folder_type).await
    }

    /// Upload image bytes under `filename`.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &UploadOptions<'_>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        self.api.upload_image(bytes, filename, options).await
    }

    /// Remove a queued prompt from the server queue.
    pub async fn cancel_job(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.api.cancel_execution(prompt_id).await
    }

    /// Interrupt whatever the server is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        self.api.interrupt().await
    }

    /// Run a template to completion and return its decoded images.
    ///
    /// Any failure is logged and yields `None`; use
    /// [`try_generate`](Self::try_generate) to find out what went wrong.
    pub async fn generate(&mut self, template: &str) -> Option<Vec<DynamicImage>> {
        match self.try_generate(template).await {
            Ok(generation) => Some(generation.images),
            Err(e) => {
                tracing::error!(error = %e, "Generation failed");
                None
            }
        }
    }

    /// Substitute the seed placeholder in `template`, run the job, and
    /// return its images.
    pub async fn try_generate(&mut self, template: &str) -> Result<Generation, GenerateError> {
        let job = parse_template(template)?;
        self.generate_parsed(&job).await
    }

    /// Run an already parsed (and possibly patched) template.
    ///
    /// Images come from the first `executed` notification for the prompt.
    /// If the prompt finishes without one, they are read from history at
    /// the graph's output node instead.
    pub async fn generate_parsed(
        &mut self,
        job: &ParsedTemplate,
    ) -> Result<Generation, GenerateError> {
        self.ensure_connected().await?;

        let prompt_id = self.submit_job(&job.graph).await?;

        let completion = match self.wait_timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, self.wait_for(&prompt_id)).await;
                match waited {
                    Ok(result) => result?,
                    Err(_) => {
                        self.abandon(&prompt_id).await;
                        return Err(GenerateError::TimedOut {
                            prompt_id,
                            waited: limit,
                        });
                    }
                }
            }
            None => self.wait_for(&prompt_id).await?,
        };

        let outputs = match completion {
            Completion::Executed { images, .. } => images,
            Completion::Finished => self.outputs_from_history(&prompt_id, &job.graph).await?,
            Completion::Failed { node_id, message } => {
                return Err(GenerateError::ExecutionFailed {
                    prompt_id,
                    node_id,
                    message,
                })
            }
            Completion::Interrupted { node_id } => {
                return Err(GenerateError::ExecutionFailed {
                    prompt_id,
                    node_id,
                    message: "execution interrupted".to_string(),
                })
            }
        };

        let images = self.download_images(&outputs).await?;

        tracing::info!(
            prompt_id = %prompt_id,
            seed = ?job.seed,
            images = images.len(),
            "Generation complete",
        );

        Ok(Generation {
            prompt_id,
            seed: job.seed,
            outputs,
            images,
        })
    }

    /// Close the WebSocket connection, if any.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.ws_stream.close(None).await {
                tracing::debug!(error = %e, "Error while closing WebSocket");
            }
        }
    }

    // ---- private helpers ----

    /// Reuse the held socket if the server has not closed it, otherwise
    /// open a new one. Runs before submission so a prompt is never queued
    /// against a dead socket.
    async fn ensure_connected(&mut self) -> Result<(), ComfyUIClientError> {
        if let Some(connection) = self.connection.as_mut() {
            if !connection.drain_pending() {
                tracing::info!("Held WebSocket is closed, reconnecting");
                self.connection = None;
            }
        }
        if self.connection.is_none() {
            tracing::info!("WebSocket is not connected, connecting");
            self.connection = Some(self.client.connect().await?);
        }
        Ok(())
    }

    /// Wait for the prompt to end.  A broken connection is dropped so the
    /// next generation reconnects.
    async fn wait_for(&mut self, prompt_id: &str) -> Result<Completion, ComfyUIClientError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(ComfyUIClientError::Closed);
        };

        let result = await_completion(&mut connection.ws_stream, prompt_id).await;
        if result.is_err() {
            self.connection = None;
        }
        result
    }

    /// Give up on a prompt after a timeout: drop the socket, which may be
    /// mid-frame, and dequeue the prompt if it has not started.
    async fn abandon(&mut self, prompt_id: &str) {
        tracing::warn!(prompt_id, "Timed out waiting for execution, abandoning prompt");
        self.connection = None;
        if let Err(e) = self.api.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to cancel timed-out prompt");
        }
    }

    async fn outputs_from_history(
        &self,
        prompt_id: &str,
        graph: &JobGraph,
    ) -> Result<Vec<ImageRef>, GenerateError> {
        let node_id = graph
            .find_output_node()
            .ok_or_else(|| GenerateError::MissingOutput {
                prompt_id: prompt_id.to_string(),
                reason: "workflow has no SaveImage node".to_string(),
            })?;
        let history = self.api.get_history(prompt_id).await?;
        images_from_history(&history, prompt_id, &node_id)
    }

    async fn download_images(
        &self,
        outputs: &[ImageRef],
    ) -> Result<Vec<DynamicImage>, GenerateError> {
        let mut images = Vec::with_capacity(outputs.len());
        for output in outputs {
            let bytes = self
                .fetch_image(&output.filename, &output.subfolder, &output.folder_type)
                .await?;
            let image =
                image::load_from_memory(&bytes).map_err(|source| GenerateError::Decode {
                    filename: output.filename.clone(),
                    source,
                })?;
            images.push(image);
        }
        Ok(images)
    }
}

/// Read `history[prompt_id].outputs[node_id].images`.
pub fn images_from_history(
    history: &serde_json::Value,
    prompt_id: &str,
    node_id: &str,
) -> Result<Vec<ImageRef>, GenerateError> {
    let missing = |reason: String| GenerateError::MissingOutput {
        prompt_id: prompt_id.to_string(),
        reason,
    };

    let images = history
        .get(prompt_id)
        .ok_or_else(|| missing("prompt not found in history".to_string()))?
        .get("outputs")
        .and_then(|outputs| outputs.get(node_id))
        .and_then(|output| output.get("images"))
        .ok_or_else(|| missing(format!("no images recorded for node {node_id}")))?;

    serde_json::from_value(images.clone())
        .map_err(|e| missing(format!("malformed image list for node {node_id}: {e}")))
}

/// Errors from [`ComfyUISession::try_generate`].
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The template could not be turned into a job graph.
    #[error("Invalid workflow template: {0}")]
    Template(#[from] CoreError),

    /// An HTTP call failed.
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    /// The WebSocket could not be opened or broke during the wait.
    #[error(transparent)]
    Client(#[from] ComfyUIClientError),

    /// The server reported that the job failed.
    #[error("Prompt {prompt_id} failed at node {}: {message}", .node_id.as_deref().unwrap_or("?"))]
    ExecutionFailed {
        prompt_id: String,
        node_id: Option<String>,
        message: String,
    },

    /// The job finished but its output images could not be located.
    #[error("No output images for prompt {prompt_id}: {reason}")]
    MissingOutput { prompt_id: String, reason: String },

    /// An output image could not be decoded.
    #[error("Failed to decode image {filename}: {source}")]
    Decode {
        filename: String,
        source: image::ImageError,
    },

    /// No completion notification arrived within the wait timeout.
    #[error("Timed out after {waited:?} waiting for prompt {prompt_id}")]
    TimedOut { prompt_id: String, waited: Duration },
}
