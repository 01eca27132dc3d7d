//! Subcommand handlers. Each prints human-readable status to stdout.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use comfyctl_comfyui::api::UploadOptions;
use comfyctl_comfyui::session::ComfyUISession;
use comfyctl_core::graph::ClassFilter;
use comfyctl_core::template::parse_template;

use crate::args::{Assignment, NodeInput};
use crate::files;

/// Inputs of the `generate` subcommand.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub workflow: PathBuf,
    pub output: PathBuf,
    pub assignments: Vec<Assignment>,
    pub classes: Vec<String>,
    pub only: bool,
    /// Applied after `assignments`.
    pub inputs: Vec<NodeInput>,
}

pub async fn history(session: &ComfyUISession, prompt_id: &str) -> anyhow::Result<()> {
    let record = session
        .get_history(prompt_id)
        .await
        .with_context(|| format!("Failed to fetch history for {prompt_id}"))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub async fn upload(
    session: &ComfyUISession,
    image_file: &Path,
    name: &str,
    options: &UploadOptions<'_>,
) -> anyhow::Result<()> {
    let bytes = files::read_image(image_file).await?;
    let ack = session
        .upload_image(bytes, name, options)
        .await
        .with_context(|| format!("Failed to upload {}", image_file.display()))?;

    println!(
        "Uploaded {} as {} (folder: {}, subfolder: {:?})",
        image_file.display(),
        ack.name,
        ack.folder_type,
        ack.subfolder,
    );
    Ok(())
}

pub async fn cancel(session: &ComfyUISession, prompt_id: &str) -> anyhow::Result<()> {
    session
        .cancel_job(prompt_id)
        .await
        .with_context(|| format!("Failed to cancel {prompt_id}"))?;

    println!("Removed {prompt_id} from the queue");
    Ok(())
}

pub async fn interrupt(session: &ComfyUISession) -> anyhow::Result<()> {
    session
        .interrupt()
        .await
        .context("Failed to interrupt execution")?;

    println!("Interrupted the running prompt");
    Ok(())
}

/// Run the workflow and save its images. Returns the paths written.
///
/// A generation that finishes with no images is an error.
pub async fn generate(
    session: &mut ComfyUISession,
    request: &GenerateRequest,
) -> anyhow::Result<Vec<PathBuf>> {
    let template = files::read_workflow_template(&request.workflow).await?;
    let mut job = parse_template(&template)
        .with_context(|| format!("Invalid workflow {}", request.workflow.display()))?;

    let filter = if request.only {
        ClassFilter::only(&request.classes)
    } else {
        ClassFilter::excluding(&request.classes)
    };
    for assignment in &request.assignments {
        let rewritten = job
            .graph
            .replace_field_value(&assignment.field, &assignment.value, filter);
        if rewritten == 0 {
            tracing::warn!(field = %assignment.field, "Override matched no node field");
        } else {
            tracing::debug!(field = %assignment.field, rewritten, "Override applied");
        }
    }

    for input in &request.inputs {
        job.graph
            .set_node_input(&input.node_id, &input.field, input.value.clone())
            .with_context(|| format!("Cannot set {}.{}", input.node_id, input.field))?;
    }

    if let Some(seed) = job.seed {
        println!("Seed: {seed}");
    }
    println!("Submitting {}", request.workflow.display());

    let generation = session
        .generate_parsed(&job)
        .await
        .context("Generation failed")?;

    if generation.images.is_empty() {
        bail!("Prompt {} finished without images", generation.prompt_id);
    }

    let paths = files::save_images(&generation.images, &request.output).await?;
    for path in &paths {
        println!("Saved {}", path.display());
    }
    Ok(paths)
}
