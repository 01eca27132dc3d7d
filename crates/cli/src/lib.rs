//! `comfyctl` command-line client.
//!
//! The binary is a thin shell over [`run`]; argument types live in
//! [`args`] and file handling in [`files`].

pub mod args;
pub mod commands;
pub mod files;

use std::time::Duration;

use comfyctl_comfyui::api::UploadOptions;
use comfyctl_comfyui::session::ComfyUISession;
use comfyctl_core::config::ClientConfig;

use crate::args::{Cli, Command};
use crate::commands::GenerateRequest;

/// Execute one parsed command line against `base`, the environment
/// configuration, with the command-line overrides applied on top.
pub async fn run(cli: Cli, base: ClientConfig) -> anyhow::Result<()> {
    let timeout = match &cli.command {
        Command::Generate { timeout, .. } => timeout.map(Duration::from_secs),
        _ => None,
    };
    let config = base.with_overrides(cli.server, cli.ws_url, timeout);

    tracing::debug!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        wait_timeout = ?config.wait_timeout,
        "Resolved ComfyUI configuration",
    );

    let mut session = ComfyUISession::new(&config);

    match cli.command {
        Command::History { prompt_id } => commands::history(&session, &prompt_id).await,
        Command::Upload {
            image_file,
            name,
            subfolder,
            folder_type,
            overwrite,
        } => {
            let options = UploadOptions {
                subfolder: subfolder.as_deref(),
                folder_type: folder_type.as_deref(),
                overwrite,
            };
            commands::upload(&session, &image_file, &name, &options).await
        }
        Command::Cancel { prompt_id } => commands::cancel(&session, &prompt_id).await,
        Command::Interrupt => commands::interrupt(&session).await,
        Command::Generate {
            workflow,
            output,
            assignments,
            classes,
            only,
            inputs,
            ..
        } => {
            let request = GenerateRequest {
                workflow,
                output,
                assignments,
                classes,
                only,
                inputs,
            };
            let result = commands::generate(&mut session, &request).await;
            session.close().await;
            result.map(|_| ())
        }
    }
}
