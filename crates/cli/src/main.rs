//! `comfyctl` -- command-line client for a ComfyUI server.
//!
//! # Environment variables
//!
//! | Variable                    | Required | Default                 | Description                     |
//! |-----------------------------|----------|-------------------------|---------------------------------|
//! | `COMFYUI_API_URL`           | no       | `http://127.0.0.1:8188` | HTTP base URL                   |
//! | `COMFYUI_WS_URL`            | no       | derived from API URL    | WebSocket base URL              |
//! | `COMFYUI_WAIT_TIMEOUT_SECS` | no       | --                      | Bound on waiting for a job      |
//! | `RUST_LOG`                  | no       | `comfyctl=info`         | Log filter                      |

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfyctl_cli::args::Cli;
use comfyctl_core::config::ClientConfig;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfyctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match ClientConfig::from_env() {
        Ok(config) => comfyctl_cli::run(cli, config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
