//! Workflow templates with a random-seed placeholder.
//!
//! A template is the raw text of a job graph in which every occurrence of
//! [`SEED_PLACEHOLDER`] is replaced by one freshly drawn `u32` before the
//! text is parsed. One template file can then drive many generations
//! without editing the seed by hand.
//!
//! The placeholder may appear bare (`"seed": __RANDOM_SEED__`) to produce a
//! number, or quoted to produce a string.

use crate::error::CoreError;
use crate::graph::JobGraph;

/// Token replaced by the generated seed.
pub const SEED_PLACEHOLDER: &str = "__RANDOM_SEED__";

/// A template after seed substitution and parsing.
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
    pub graph: JobGraph,
    /// The substituted seed, `None` if the template had no placeholder.
    pub seed: Option<u32>,
}

/// Draw a seed uniformly over the full `u32` range.
pub fn random_seed() -> u32 {
    rand::random()
}

/// Replace every placeholder occurrence with `seed`, in a single pass.
pub fn substitute_seed_with(template: &str, seed: u32) -> String {
    template.replace(SEED_PLACEHOLDER, &seed.to_string())
}

/// Replace every placeholder occurrence with one random seed.
pub fn substitute_seed(template: &str) -> (String, u32) {
    let seed = random_seed();
    (substitute_seed_with(template, seed), seed)
}

/// Substitute the seed placeholder and parse the result as a job graph.
pub fn parse_template(template: &str) -> Result<ParsedTemplate, CoreError> {
    let (text, seed) = if template.contains(SEED_PLACEHOLDER) {
        let (text, seed) = substitute_seed(template);
        (text, Some(seed))
    } else {
        (template.to_string(), None)
    };

    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| CoreError::Validation(format!("workflow is not valid JSON: {e}")))?;

    Ok(ParsedTemplate {
        graph: JobGraph::from_value(value)?,
        seed,
    })
}
