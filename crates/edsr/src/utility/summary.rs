//! # Parameter Summaries
//!
//! Renders a [`ParameterMap`] as a nested JSON tree of shapes;
//! splitting names on ``.``:
//!
//! ```text
//! {"head": {"0": {"bias": {"_shape": [64]}, "weight": {"_shape": [64, 3, 3, 3]}}}}
//! ```

use crate::weights::checkpoint::ParameterMap;
use serde_json::{Map, Value};

/// The total number of scalar values.
pub fn parameter_count(params: &ParameterMap) -> usize {
    params
        .values()
        .map(|data| data.shape.iter().product::<usize>())
        .sum()
}

/// Build the nested ``{"_shape": [...]}`` summary tree.
pub fn parameter_summary(params: &ParameterMap) -> Value {
    let mut root: Map<String, Value> = Map::new();

    for (name, data) in params {
        let mut node = &mut root;
        let mut parts = name.split('.').peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let mut leaf: Map<String, Value> = Map::new();
                leaf.insert(
                    "_shape".to_string(),
                    Value::Array(data.shape.iter().copied().map(Value::from).collect()),
                );
                node.insert(part.to_string(), Value::Object(leaf));
                break;
            }

            let child = node
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            node = match child {
                Value::Object(map) => map,
                _ => unreachable!("summary nodes are objects"),
            };
        }
    }

    Value::Object(root)
}

/// Pretty-print the summary of `params`.
pub fn display_parameter_summary(params: &ParameterMap) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&parameter_summary(params))
}
