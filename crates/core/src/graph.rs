//! ComfyUI job graph model and patching utilities.
//!
//! A job graph is the API-format workflow submitted to `POST /prompt`: a
//! JSON object mapping node ids to node objects, where each node carries a
//! `class_type` tag and an `inputs` map. Any JSON object carrying a string
//! `class_type` is treated as a node, wherever it appears in the tree.
//!
//! Traversal recurses without cycle detection. `serde_json::Value` is an
//! owned tree so a cycle cannot be built, but pathologically deep input
//! will overflow the stack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Class tag of the node whose images are the job's deliverable.
pub const OUTPUT_NODE_CLASS: &str = "SaveImage";

/// Key holding a node's class tag.
pub const CLASS_TYPE_KEY: &str = "class_type";

/// Key holding a node's named inputs.
pub const INPUTS_KEY: &str = "inputs";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A ComfyUI job graph (API format), keyed by node id.
///
/// Key order is the order of the source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobGraph(Map<String, Value>);

/// Structural role of a JSON value inside a job graph.
#[derive(Debug, Clone, Copy)]
pub enum GraphValue<'a> {
    /// An object tagged with a string `class_type`.
    Node {
        class_type: &'a str,
        body: &'a Map<String, Value>,
    },
    /// An untagged object (e.g. a node's `inputs` map).
    Object(&'a Map<String, Value>),
    Array(&'a [Value]),
    /// Strings, numbers, booleans and null.
    Scalar(&'a Value),
}

impl<'a> GraphValue<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Object(map) => match class_type_of(map) {
                Some(class_type) => GraphValue::Node {
                    class_type,
                    body: map,
                },
                None => GraphValue::Object(map),
            },
            Value::Array(items) => GraphValue::Array(items),
            other => GraphValue::Scalar(other),
        }
    }
}

/// Class filter policy for [`JobGraph::replace_field_value`].
#[derive(Debug, Clone, Copy)]
pub struct ClassFilter<'a> {
    /// Class tags named by the filter, `None` for no filter.
    pub classes: Option<&'a [String]>,
    /// `true`: rewrite every node *except* the named classes.
    /// `false`: rewrite *only* the named classes.
    pub exclude: bool,
}

impl ClassFilter<'static> {
    /// No filter: every node is rewritten.
    pub const ALL: Self = Self {
        classes: None,
        exclude: true,
    };
}

impl<'a> ClassFilter<'a> {
    pub fn excluding(classes: &'a [String]) -> Self {
        Self {
            classes: Some(classes),
            exclude: true,
        }
    }

    pub fn only(classes: &'a [String]) -> Self {
        Self {
            classes: Some(classes),
            exclude: false,
        }
    }

    /// Whether a node with the given class tag should be rewritten.
    ///
    /// Without a class list this is "always" when excluding and "never"
    /// when including.
    pub fn applies_to(&self, class_type: &str) -> bool {
        let listed = self
            .classes
            .is_some_and(|classes| classes.iter().any(|c| c == class_type));
        if self.exclude {
            !listed
        } else {
            listed
        }
    }
}

// ---------------------------------------------------------------------------
// JobGraph
// ---------------------------------------------------------------------------

impl JobGraph {
    /// Wrap a parsed JSON document. The top level must be an object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CoreError::Validation(format!(
                "job graph must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Look up a top-level node by id.
    pub fn node(&self, node_id: &str) -> Option<&Value> {
        self.0.get(node_id)
    }

    /// Find the id of the first [`OUTPUT_NODE_CLASS`] node.
    ///
    /// Depth-first and pre-order, visiting keys in document order, so the
    /// first match in the file wins. Nodes found inside arrays are
    /// identified by their index.
    pub fn find_output_node(&self) -> Option<String> {
        find_in_map(&self.0)
    }

    /// Overwrite `field_name` with `new_value` on every node accepted by
    /// `filter`, anywhere in the graph.
    ///
    /// A node's fields are its own top-level keys plus the entries of its
    /// `inputs` map. Only fields that already exist are overwritten. The
    /// walk descends into every node whether or not it was rewritten.
    ///
    /// Returns the number of fields rewritten.
    pub fn replace_field_value(
        &mut self,
        field_name: &str,
        new_value: &Value,
        filter: ClassFilter<'_>,
    ) -> usize {
        let rewrite = FieldRewrite {
            field_name,
            new_value,
            filter,
        };
        replace_in_map(&mut self.0, &rewrite)
    }

    /// Set `inputs[field]` on the top-level node `node_id`.
    pub fn set_node_input(
        &mut self,
        node_id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), CoreError> {
        let node = self.0.get_mut(node_id).ok_or_else(|| CoreError::NotFound {
            entity: "node",
            id: node_id.to_string(),
        })?;

        match node.get_mut(INPUTS_KEY) {
            Some(Value::Object(inputs)) => {
                inputs.insert(field.to_string(), value);
                Ok(())
            }
            _ => Err(CoreError::Validation(format!(
                "node {node_id} has no inputs map"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

fn class_type_of(map: &Map<String, Value>) -> Option<&str> {
    map.get(CLASS_TYPE_KEY).and_then(Value::as_str)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn is_output_node(value: &Value) -> bool {
    matches!(
        GraphValue::classify(value),
        GraphValue::Node { class_type, .. } if class_type == OUTPUT_NODE_CLASS
    )
}

fn find_in_map(map: &Map<String, Value>) -> Option<String> {
    map.iter().find_map(|(key, value)| {
        if is_output_node(value) {
            Some(key.clone())
        } else {
            find_in_value(value)
        }
    })
}

fn find_in_value(value: &Value) -> Option<String> {
    match GraphValue::classify(value) {
        GraphValue::Node { body, .. } | GraphValue::Object(body) => find_in_map(body),
        GraphValue::Array(items) => items.iter().enumerate().find_map(|(index, item)| {
            if is_output_node(item) {
                Some(index.to_string())
            } else {
                find_in_value(item)
            }
        }),
        GraphValue::Scalar(_) => None,
    }
}

struct FieldRewrite<'a> {
    field_name: &'a str,
    new_value: &'a Value,
    filter: ClassFilter<'a>,
}

impl FieldRewrite<'_> {
    /// Overwrite the field on one node, returning how many slots changed.
    fn apply(&self, node: &mut Map<String, Value>) -> usize {
        let mut rewritten = 0;

        if let Some(slot) = node.get_mut(self.field_name) {
            *slot = self.new_value.clone();
            rewritten += 1;
        }

        if self.field_name != INPUTS_KEY {
            if let Some(Value::Object(inputs)) = node.get_mut(INPUTS_KEY) {
                if let Some(slot) = inputs.get_mut(self.field_name) {
                    *slot = self.new_value.clone();
                    rewritten += 1;
                }
            }
        }

        rewritten
    }
}

fn replace_in_map(map: &mut Map<String, Value>, rewrite: &FieldRewrite<'_>) -> usize {
    map.values_mut()
        .map(|value| replace_in_value(value, rewrite))
        .sum()
}

fn replace_in_value(value: &mut Value, rewrite: &FieldRewrite<'_>) -> usize {
    match value {
        Value::Object(map) => {
            let applies = class_type_of(map).is_some_and(|c| rewrite.filter.applies_to(c));
            let here = if applies { rewrite.apply(map) } else { 0 };
            here + replace_in_map(map, rewrite)
        }
        Value::Array(items) => items
            .iter_mut()
            .map(|item| replace_in_value(item, rewrite))
            .sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn graph(value: Value) -> JobGraph {
        JobGraph::from_value(value).unwrap()
    }

    fn sample() -> JobGraph {
        graph(json!({
            "3": {
                "class_type": "KSampler",
                "inputs": { "seed": 1, "steps": 20, "model": ["4", 0] }
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": "sd15.safetensors" }
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": { "images": ["8", 0], "filename_prefix": "ComfyUI" }
            }
        }))
    }

    #[test]
    fn finds_top_level_output_node() {
        assert_eq!(sample().find_output_node().as_deref(), Some("9"));
    }

    #[test]
    fn finds_deeply_nested_output_node() {
        let g = graph(json!({
            "group": {
                "meta": { "title": "wrapper" },
                "members": [
                    { "class_type": "VAEDecode", "inputs": {} },
                    { "nested": { "77": { "class_type": "SaveImage", "inputs": {} } } }
                ]
            }
        }));
        assert_eq!(g.find_output_node().as_deref(), Some("77"));
    }

    #[test]
    fn output_node_inside_array_is_identified_by_index() {
        let g = graph(json!({
            "nodes": [
                { "class_type": "KSampler" },
                { "class_type": "SaveImage" }
            ]
        }));
        assert_eq!(g.find_output_node().as_deref(), Some("1"));
    }

    #[test]
    fn no_output_node_returns_none() {
        let g = graph(json!({
            "1": { "class_type": "KSampler", "inputs": { "seed": 5 } },
            "2": { "class_type": "PreviewImage", "inputs": {} }
        }));
        assert!(g.find_output_node().is_none());
    }

    #[test]
    fn first_output_node_in_document_order_wins() {
        let g: JobGraph = serde_json::from_str(
            r#"{
                "20": { "class_type": "SaveImage", "inputs": {} },
                "10": { "class_type": "SaveImage", "inputs": {} }
            }"#,
        )
        .unwrap();
        assert_eq!(g.find_output_node().as_deref(), Some("20"));
    }

    #[test]
    fn output_tag_must_be_a_class_type() {
        let g = graph(json!({
            "1": { "title": "SaveImage", "inputs": { "class": "SaveImage" } }
        }));
        assert!(g.find_output_node().is_none());
    }

    #[test]
    fn excluded_class_is_left_untouched() {
        let mut g = graph(json!({
            "a": { "class_type": "A", "seed": 1 },
            "b": { "class_type": "B", "seed": 1 }
        }));
        let classes = vec!["A".to_string()];

        let n = g.replace_field_value("seed", &json!(42), ClassFilter::excluding(&classes));

        assert_eq!(n, 1);
        assert_eq!(g.node("a").unwrap()["seed"], 1);
        assert_eq!(g.node("b").unwrap()["seed"], 42);
    }

    #[test]
    fn include_mode_only_rewrites_listed_classes() {
        let mut g = graph(json!({
            "a": { "class_type": "A", "seed": 1 },
            "b": { "class_type": "B", "seed": 1 }
        }));
        let classes = vec!["A".to_string()];

        g.replace_field_value("seed", &json!(42), ClassFilter::only(&classes));

        assert_eq!(g.node("a").unwrap()["seed"], 42);
        assert_eq!(g.node("b").unwrap()["seed"], 1);
    }

    #[test]
    fn no_filter_rewrites_every_node_with_the_field() {
        let mut g = sample();

        let n = g.replace_field_value("seed", &json!(7), ClassFilter::ALL);

        assert_eq!(n, 1);
        assert_eq!(g.node("3").unwrap()["inputs"]["seed"], 7);
        // Nodes without the field are not given one.
        assert!(g.node("4").unwrap()["inputs"].get("seed").is_none());
    }

    #[test]
    fn include_mode_without_classes_rewrites_nothing() {
        let mut g = sample();
        let filter = ClassFilter {
            classes: None,
            exclude: false,
        };

        assert_eq!(g.replace_field_value("seed", &json!(7), filter), 0);
        assert_eq!(g, sample());
    }

    #[test]
    fn rewrites_nodes_nested_in_arrays_and_nodes() {
        let mut g = graph(json!({
            "outer": {
                "class_type": "Group",
                "steps": 10,
                "children": [
                    { "class_type": "KSampler", "inputs": { "steps": 20 } },
                    { "wrapper": { "class_type": "KSampler", "steps": 30 } }
                ]
            }
        }));

        let n = g.replace_field_value("steps", &json!(4), ClassFilter::ALL);

        assert_eq!(n, 3);
        let outer = g.node("outer").unwrap();
        assert_eq!(outer["steps"], 4);
        assert_eq!(outer["children"][0]["inputs"]["steps"], 4);
        assert_eq!(outer["children"][1]["wrapper"]["steps"], 4);
    }

    #[test]
    fn set_node_input_by_id() {
        let mut g = sample();
        g.set_node_input("9", "filename_prefix", json!("portrait"))
            .unwrap();
        assert_eq!(g.node("9").unwrap()["inputs"]["filename_prefix"], "portrait");
    }

    #[test]
    fn set_node_input_unknown_node_is_not_found() {
        let mut g = sample();
        let err = g.set_node_input("404", "seed", json!(1)).unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "node", .. });
    }

    #[test]
    fn set_node_input_without_inputs_map_fails() {
        let mut g = graph(json!({ "1": { "class_type": "Note" } }));
        let err = g.set_node_input("1", "text", json!("x")).unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn non_object_document_is_rejected() {
        let err = JobGraph::from_value(json!([1, 2, 3])).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("an array"));
    }
}
