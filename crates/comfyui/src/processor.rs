//! WebSocket message processing for a single in-flight prompt.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them into
//! typed [`ComfyUIMessage`] variants, and waits for the notification that
//! ends the watched prompt.  The socket carries messages for every prompt
//! the server runs for this client id, so anything addressed to another
//! prompt is skipped.

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::ComfyUIClientError;
use crate::messages::{parse_message, ComfyUIMessage, ImageRef};

/// How a watched prompt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// A node produced output for the prompt.
    Executed { node: String, images: Vec<ImageRef> },
    /// Execution finished without an `executed` notification, typically
    /// because every node was served from cache.  Outputs must be read
    /// from history.
    Finished,
    /// The server reported an error for the prompt.
    Failed {
        node_id: Option<String>,
        message: String,
    },
    /// The prompt was interrupted before completing.
    Interrupted { node_id: Option<String> },
}

/// Wait on `stream` until the prompt `prompt_id` completes or fails.
///
/// Returns [`ComfyUIClientError::Closed`] when the stream ends or a
/// close frame arrives, and [`ComfyUIClientError::Protocol`] on a receive
/// error.  In both cases the connection should be discarded.  There is no
/// timeout here; callers bound the wait themselves.
///
/// Binary frames (preview images) are ignored.
pub async fn await_completion<S>(
    stream: &mut S,
    prompt_id: &str,
) -> Result<Completion, ComfyUIClientError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if let Some(completion) = handle_text_message(&text, prompt_id) {
                    return Ok(completion);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!(prompt_id, "Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                return Err(ComfyUIClientError::Closed);
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(prompt_id, error = %e, "WebSocket receive error");
                return Err(ComfyUIClientError::Protocol(e.to_string()));
            }
        }
    }

    Err(ComfyUIClientError::Closed)
}

/// Parse one text frame and decide whether it ends the watched prompt.
fn handle_text_message(text: &str, prompt_id: &str) -> Option<Completion> {
    match parse_message(text) {
        Ok(msg) => interpret(msg, prompt_id),
        Err(e) => {
            tracing::debug!(
                error = %e,
                raw_message = %text,
                "Skipping unrecognised ComfyUI message",
            );
            None
        }
    }
}

/// Map a parsed message to a [`Completion`] for `prompt_id`, if it is one.
pub fn interpret(msg: ComfyUIMessage, prompt_id: &str) -> Option<Completion> {
    match msg {
        ComfyUIMessage::Executed(data) if data.prompt_id == prompt_id => {
            let node = data.node?;
            tracing::info!(
                prompt_id,
                node = %node,
                images = data.output.images.len(),
                "Node executed with output",
            );
            Some(Completion::Executed {
                node,
                images: data.output.images,
            })
        }
        ComfyUIMessage::Executing(data) if data.prompt_id == prompt_id => match data.node {
            Some(node) => {
                tracing::debug!(prompt_id, node = %node, "Executing node");
                None
            }
            None => {
                tracing::info!(prompt_id, "Execution finished without node output");
                Some(Completion::Finished)
            }
        },
        ComfyUIMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
            tracing::error!(
                prompt_id,
                node_id = %data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
            Some(Completion::Failed {
                node_id: Some(data.node_id),
                message: format!("{}: {}", data.exception_type, data.exception_message),
            })
        }
        ComfyUIMessage::ExecutionInterrupted(data) if data.prompt_id == prompt_id => {
            tracing::warn!(prompt_id, node_id = ?data.node_id, "Execution interrupted");
            Some(Completion::Interrupted {
                node_id: data.node_id,
            })
        }
        ComfyUIMessage::ExecutionStart(data) if data.prompt_id == prompt_id => {
            tracing::info!(prompt_id, "Execution started");
            None
        }
        ComfyUIMessage::ExecutionCached(data) if data.prompt_id == prompt_id => {
            tracing::debug!(prompt_id, cached = data.nodes.len(), "Execution used cache");
            None
        }
        ComfyUIMessage::Progress(data) => {
            let percent = if data.max > 0 {
                ((data.value as f64 / data.max as f64) * 100.0) as i16
            } else {
                0
            };
            tracing::debug!(
                prompt_id,
                value = data.value,
                max = data.max,
                percent,
                "Generation progress",
            );
            None
        }
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "ComfyUI queue status",
            );
            None
        }
        other => {
            tracing::trace!(prompt_id, message = ?other, "Message for another prompt");
            None
        }
    }
}
