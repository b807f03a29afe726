//! JSON Schema normalization for tool definitions.
//!
//! The backend's function-calling validator accepts only a subset of JSON
//! Schema. [`normalize_schema`] rewrites a schema tree into that subset:
//! - Unsupported 2020-12 keywords are removed at every schema position
//! - `anyOf` / `oneOf` unions are flattened onto their first non-null branch
//! - `allOf` members are merged into the parent, first writer wins
//! - `type` arrays collapse to their first non-null entry
//!
//! Malformed constructs are skipped rather than rejected so a single odd tool
//! schema never fails the whole request.

use serde_json::{Map, Value};
use tracing::trace;

/// Keywords the backend rejects outright.
pub const UNSUPPORTED_KEYS: &[&str] = &[
    "propertyNames",
    "$ref",
    "$defs",
    "definitions",
    "patternProperties",
    "unevaluatedProperties",
    "unevaluatedItems",
    "dependentSchemas",
    "dependentRequired",
    "if",
    "then",
    "else",
    "not",
    "contentMediaType",
    "contentEncoding",
    "contentSchema",
    "minContains",
    "maxContains",
];

const UNION_KEYS: [&str; 2] = ["anyOf", "oneOf"];

/// Normalize a schema value.
///
/// Non-object values are returned unchanged.
#[must_use]
pub fn normalize_schema(mut schema: Value) -> Value {
    if let Value::Object(node) = &mut schema {
        normalize_schema_map(node);
    }
    schema
}

/// Normalize a schema object in place.
pub fn normalize_schema_map(node: &mut Map<String, Value>) {
    strip_unsupported(node);

    for key in UNION_KEYS {
        flatten_union(node, key);
    }
    merge_all_of(node);
    collapse_type_array(node);
    normalize_nested(node);

    // allOf members may carry keys that were already stripped from the parent
    strip_unsupported(node);
}

fn strip_unsupported(node: &mut Map<String, Value>) {
    for key in UNSUPPORTED_KEYS {
        if node.shift_remove(*key).is_some() {
            trace!(key = *key, "Removed unsupported schema keyword");
        }
    }
}

fn flatten_union(node: &mut Map<String, Value>, key: &str) {
    let chosen = match node.get_mut(key) {
        Some(Value::Array(branches)) if branches.is_empty() => None,
        Some(Value::Array(branches)) => {
            for branch in branches.iter_mut() {
                if let Value::Object(branch) = branch {
                    normalize_schema_map(branch);
                }
            }
            branches
                .iter()
                .filter_map(Value::as_object)
                .find(|branch| is_concrete_type(branch.get("type")))
                .cloned()
        }
        _ => return,
    };

    node.shift_remove(key);

    match chosen {
        Some(branch) => {
            trace!(union = key, "Flattened union onto first concrete branch");
            for (field, value) in branch {
                node.insert(field, value);
            }
        }
        None => trace!(union = key, "Union has no concrete branch, leaving node untyped"),
    }
}

fn is_concrete_type(ty: Option<&Value>) -> bool {
    matches!(ty, Some(Value::String(ty)) if ty != "null")
}

fn merge_all_of(node: &mut Map<String, Value>) {
    if !matches!(node.get("allOf"), Some(Value::Array(_))) {
        return;
    }
    let Some(Value::Array(members)) = node.shift_remove("allOf") else {
        return;
    };

    for member in members {
        let Value::Object(mut member) = member else {
            continue;
        };
        normalize_schema_map(&mut member);
        for (field, value) in member {
            node.entry(field).or_insert(value);
        }
    }
}

fn collapse_type_array(node: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = node.get("type") else {
        return;
    };
    // An all-null type array is left as is.
    let Some(first) = types
        .iter()
        .filter_map(Value::as_str)
        .find(|ty| *ty != "null")
        .map(str::to_owned)
    else {
        return;
    };
    node.insert("type".to_owned(), Value::String(first));
}

fn normalize_nested(node: &mut Map<String, Value>) {
    if let Some(Value::Object(properties)) = node.get_mut("properties") {
        for property in properties.values_mut() {
            normalize_value(property);
        }
    }

    match node.get_mut("items") {
        Some(Value::Object(items)) => normalize_schema_map(items),
        Some(Value::Array(items)) => items.iter_mut().for_each(normalize_value),
        _ => {}
    }

    for key in ["additionalProperties", "contains"] {
        if let Some(value) = node.get_mut(key) {
            normalize_value(value);
        }
    }

    if let Some(Value::Array(items)) = node.get_mut("prefixItems") {
        items.iter_mut().for_each(normalize_value);
    }

    for key in UNION_KEYS.iter().copied().chain(["allOf"]) {
        if let Some(Value::Array(members)) = node.get_mut(key) {
            members.iter_mut().for_each(normalize_value);
        }
    }
}

fn normalize_value(value: &mut Value) {
    if let Value::Object(node) = value {
        normalize_schema_map(node);
    }
}
