//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

/// comfyctl - drive a ComfyUI server from the command line.
#[derive(Parser, Debug)]
#[command(name = "comfyctl", version, about = "Submit ComfyUI workflows and manage images")]
pub struct Cli {
    /// ComfyUI HTTP base URL (overrides COMFYUI_API_URL). The WebSocket URL
    /// follows it unless COMFYUI_WS_URL or --ws-url is set
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// ComfyUI WebSocket base URL (overrides COMFYUI_WS_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub ws_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the stored history record of a prompt
    History {
        /// Prompt id returned when the workflow was queued
        prompt_id: String,
    },

    /// Upload an image to the server
    Upload {
        /// Local image file
        image_file: PathBuf,

        /// File name to store the image under
        name: String,

        /// Subfolder inside the target folder
        #[arg(long)]
        subfolder: Option<String>,

        /// Target folder (input, temp, output); the server defaults to input
        #[arg(long = "type", value_name = "TYPE")]
        folder_type: Option<String>,

        /// Replace an existing file of the same name
        #[arg(long)]
        overwrite: bool,
    },

    /// Run a workflow template and save the resulting images
    ///
    /// Every `__RANDOM_SEED__` in the template is replaced by one random
    /// seed. The first image is written to OUTPUT, further images next to
    /// it as `<stem>_<n>.<ext>`.
    Generate {
        /// Workflow JSON in API format
        workflow: PathBuf,

        /// Where to save the first image; the extension picks the format
        output: PathBuf,

        /// Give up after this many seconds (0 waits forever)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Overwrite a node field everywhere in the graph, e.g. `steps=30`
        #[arg(long = "set", value_name = "FIELD=JSON", value_parser = parse_assignment)]
        assignments: Vec<Assignment>,

        /// Node class to leave untouched by --set (repeatable)
        #[arg(long = "class", value_name = "CLASS")]
        classes: Vec<String>,

        /// Apply --set only to the --class nodes instead of skipping them
        #[arg(long, requires = "classes")]
        only: bool,

        /// Set one input of one node, e.g. `9.filename_prefix=portrait`
        #[arg(long = "input", value_name = "NODE.FIELD=JSON", value_parser = parse_node_input)]
        inputs: Vec<NodeInput>,
    },

    /// Remove a queued prompt before it starts running
    Cancel {
        /// Prompt id returned when the workflow was queued
        prompt_id: String,
    },

    /// Stop whatever the server is executing right now
    Interrupt,
}

/// One `--set FIELD=JSON` override.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub value: Value,
}

/// One `--input NODE.FIELD=JSON` override.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub node_id: String,
    pub field: String,
    pub value: Value,
}

/// Parse `FIELD=JSON`. A value that is not valid JSON is taken as a
/// plain string, so `--set ckpt_name=model.safetensors` needs no quoting.
pub fn parse_assignment(raw: &str) -> Result<Assignment, String> {
    let (field, value) = split_assignment(raw)?;
    Ok(Assignment {
        field: field.to_string(),
        value,
    })
}

/// Parse `NODE.FIELD=JSON`, with the same value rules as
/// [`parse_assignment`]. Node ids may not contain a dot.
pub fn parse_node_input(raw: &str) -> Result<NodeInput, String> {
    let (target, value) = split_assignment(raw)?;
    let (node_id, field) = target
        .split_once('.')
        .filter(|(node, field)| !node.is_empty() && !field.is_empty())
        .ok_or_else(|| format!("expected NODE.FIELD=VALUE, got {raw:?}"))?;

    Ok(NodeInput {
        node_id: node_id.to_string(),
        field: field.to_string(),
        value,
    })
}

fn split_assignment(raw: &str) -> Result<(&str, Value), String> {
    let (target, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got {raw:?}"))?;

    let target = target.trim();
    if target.is_empty() {
        return Err(format!("missing field name in {raw:?}"));
    }

    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((target, value))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn assignment_value_is_json_when_possible() {
        let a = parse_assignment("steps=30").unwrap();
        assert_eq!(a.field, "steps");
        assert_eq!(a.value, json!(30));

        let a = parse_assignment(r#"model=["4", 0]"#).unwrap();
        assert_eq!(a.value, json!(["4", 0]));
    }

    #[test]
    fn assignment_falls_back_to_string() {
        let a = parse_assignment("ckpt_name=sd_xl=base.safetensors").unwrap();
        assert_eq!(a.field, "ckpt_name");
        assert_eq!(a.value, json!("sd_xl=base.safetensors"));
    }

    #[test]
    fn assignment_needs_field_and_equals() {
        assert_matches!(parse_assignment("steps"), Err(_));
        assert_matches!(parse_assignment("=3"), Err(_));
    }

    #[test]
    fn node_input_splits_node_and_field() {
        let input = parse_node_input("9.filename_prefix=portrait").unwrap();
        assert_eq!(
            input,
            NodeInput {
                node_id: "9".into(),
                field: "filename_prefix".into(),
                value: json!("portrait"),
            }
        );
    }

    #[test]
    fn node_input_needs_both_parts() {
        assert_matches!(parse_node_input("filename_prefix=x"), Err(_));
        assert_matches!(parse_node_input(".seed=1"), Err(_));
        assert_matches!(parse_node_input("3.=1"), Err(_));
    }

    #[test]
    fn parses_generate_with_overrides() {
        let cli = Cli::try_parse_from([
            "comfyctl",
            "--server",
            "http://gpu:8188",
            "generate",
            "flow.json",
            "out.png",
            "--set",
            "steps=12",
            "--set",
            "cfg=6.5",
            "--class",
            "KSampler",
            "--only",
            "--input",
            "3.denoise=0.4",
            "--timeout",
            "90",
        ])
        .unwrap();

        assert_eq!(cli.server.as_deref(), Some("http://gpu:8188"));
        assert_matches!(
            cli.command,
            Command::Generate { assignments, classes, only: true, timeout: Some(90), inputs, output, .. }
                if assignments.len() == 2
                    && assignments[1].value == json!(6.5)
                    && classes == ["KSampler"]
                    && inputs[0].node_id == "3"
                    && output == PathBuf::from("out.png")
        );
    }

    #[test]
    fn only_requires_a_class() {
        let result = Cli::try_parse_from(["comfyctl", "generate", "flow.json", "out.png", "--only"]);
        assert_matches!(result, Err(_));
    }

    #[test]
    fn parses_upload_flags() {
        let cli = Cli::try_parse_from([
            "comfyctl", "upload", "cat.png", "cat.png", "--type", "temp", "--overwrite",
        ])
        .unwrap();

        assert_matches!(
            cli.command,
            Command::Upload { folder_type: Some(t), overwrite: true, subfolder: None, .. } if t == "temp"
        );
    }

    #[test]
    fn parses_queue_control_commands() {
        let cli = Cli::try_parse_from(["comfyctl", "cancel", "p-1"]).unwrap();
        assert_matches!(cli.command, Command::Cancel { prompt_id } if prompt_id == "p-1");

        let cli = Cli::try_parse_from(["comfyctl", "interrupt"]).unwrap();
        assert_matches!(cli.command, Command::Interrupt);
    }
}
