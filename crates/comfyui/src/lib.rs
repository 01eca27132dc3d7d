//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, the WebSocket connection, HTTP API
//! wrappers, and [`ComfyUISession`](session::ComfyUISession), which
//! drives a generation job from submission to decoded output images.

pub mod api;
pub mod client;
pub mod messages;
pub mod processor;
pub mod session;
