//! Shared building blocks for the `comfyctl` workspace.
//!
//! Holds the job-graph utilities used to parameterize workflows before
//! submission, random-seed templating, client configuration, and the
//! common error type. Nothing in here performs network I/O.

pub mod config;
pub mod error;
pub mod graph;
pub mod template;
