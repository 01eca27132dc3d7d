//! Notifications pushed by ComfyUI over its WebSocket.
//!
//! Every text frame is a JSON object `{"type": "<kind>", "data": {...}}`.
//! Only the kinds this client reacts to are modelled; newer server
//! versions send more (`progress_state`, `executed` for text outputs,
//! ...) and those fail to parse, which callers treat as "skip".
//!
//! Binary frames carry preview images and never reach this module.

use serde::{Deserialize, Serialize};

/// A decoded server notification, tagged by `type` with the payload in
/// `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Queue depth broadcast, sent on connect and whenever the queue moves.
    Status(StatusPayload),

    // Prompt lifecycle, in the order the server emits it.
    ExecutionStart(PromptPayload),
    ExecutionCached(CachedPayload),
    /// `node: None` marks the end of the prompt.
    Executing(ExecutingPayload),
    /// Sampler step counter; not addressed to a prompt on older servers.
    Progress(ProgressPayload),
    Executed(ExecutedPayload),

    // Terminal failures.
    ExecutionError(ErrorPayload),
    ExecutionInterrupted(InterruptedPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub status: ServerStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub exec_info: QueueInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueInfo {
    /// Prompts queued or running, this one included.
    pub queue_remaining: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptPayload {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CachedPayload {
    pub prompt_id: String,
    /// Nodes whose outputs were reused instead of recomputed.
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingPayload {
    pub node: Option<String>,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressPayload {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedPayload {
    pub node: Option<String>,
    pub prompt_id: String,
    pub output: NodeOutput,
}

/// What a node produced. Non-image outputs are dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Where an image lives on the server; fetched with `GET /view`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `input` or `temp`.
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_type: String,
    pub exception_message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedPayload {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
}

/// Decode one text frame. Unknown kinds and malformed JSON are errors.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
