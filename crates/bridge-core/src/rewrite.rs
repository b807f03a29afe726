//! Request body rewriting for the intercepted routes.
//!
//! Bodies are only re-encoded when something actually changed; otherwise the
//! caller forwards the original bytes so field order and formatting survive.

use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{models::ModelTranslator, schema::normalize_schema_map};

/// Outcome of a body rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Nothing to change; forward the original bytes
    Unchanged,
    /// Forward these bytes instead of the original body
    Rewritten(Bytes),
    /// Body is not a JSON object; forward verbatim
    NotJson,
}

impl Rewrite {
    /// Resolve to the bytes that should be sent upstream
    #[must_use]
    pub fn into_body(self, original: Bytes) -> Bytes {
        match self {
            Self::Rewritten(body) => body,
            Self::Unchanged | Self::NotJson => original,
        }
    }

    /// Whether the body was modified
    #[must_use]
    pub fn is_rewritten(&self) -> bool {
        matches!(self, Self::Rewritten(_))
    }
}

/// Rewrite an Anthropic Messages body.
///
/// Maps `model` and normalizes every `tools[].input_schema`.
pub fn rewrite_messages(body: &[u8], models: &ModelTranslator) -> Rewrite {
    let Ok(mut request) = serde_json::from_slice::<Map<String, Value>>(body) else {
        return Rewrite::NotJson;
    };

    let model_changed = map_model_field(&mut request, models);
    let tools_changed = normalize_tools(&mut request, |tool| tool.get_mut("input_schema"));

    finish(request, model_changed || tools_changed)
}

/// Rewrite an OpenAI chat completions body.
///
/// Normalizes every `tools[].function.parameters`. The model name is left alone.
pub fn rewrite_chat_completions(body: &[u8]) -> Rewrite {
    let Ok(mut request) = serde_json::from_slice::<Map<String, Value>>(body) else {
        return Rewrite::NotJson;
    };

    let changed = normalize_tools(&mut request, |tool| {
        tool.get_mut("function")
            .and_then(Value::as_object_mut)
            .and_then(|function| function.get_mut("parameters"))
    });

    finish(request, changed)
}

/// Rewrite a count-tokens body before it is delegated upstream.
///
/// Unlike the proxied routes, an unparseable body is an error.
pub fn rewrite_count_tokens(
    body: &[u8],
    models: &ModelTranslator,
) -> Result<Rewrite, serde_json::Error> {
    let mut request = serde_json::from_slice::<Map<String, Value>>(body)?;

    let model_changed = map_model_field(&mut request, models);
    let tools_changed = normalize_tools(&mut request, |tool| tool.get_mut("input_schema"));

    Ok(finish(request, model_changed || tools_changed))
}

fn map_model_field(request: &mut Map<String, Value>, models: &ModelTranslator) -> bool {
    let Some(Value::String(model)) = request.get_mut("model") else {
        return false;
    };
    let mapped = models.map_model(model).to_owned();
    if mapped == *model {
        return false;
    }
    debug!(from = %model, to = %mapped, "Model mapped");
    *model = mapped;
    true
}

fn normalize_tools<F>(request: &mut Map<String, Value>, mut schema_of: F) -> bool
where
    F: FnMut(&mut Map<String, Value>) -> Option<&mut Value>,
{
    let Some(Value::Array(tools)) = request.get_mut("tools") else {
        return false;
    };

    let mut changed = false;
    for tool in tools.iter_mut().filter_map(Value::as_object_mut) {
        let name = tool.get("name").and_then(Value::as_str).map(str::to_owned);
        let Some(Value::Object(schema)) = schema_of(tool) else {
            continue;
        };

        let before = serde_json::to_vec(schema).unwrap_or_default();
        normalize_schema_map(schema);
        let after = serde_json::to_vec(schema).unwrap_or_default();

        if before != after {
            changed = true;
            debug!(tool = name.as_deref().unwrap_or("<unnamed>"), "Normalized tool schema");
        }
    }
    changed
}

fn finish(request: Map<String, Value>, changed: bool) -> Rewrite {
    if !changed {
        return Rewrite::Unchanged;
    }
    match serde_json::to_vec(&request) {
        Ok(body) => Rewrite::Rewritten(Bytes::from(body)),
        Err(error) => {
            debug!(%error, "Failed to re-encode rewritten body, forwarding original");
            Rewrite::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OPUS_THINKING, SONNET_THINKING};
    use serde_json::json;

    fn parse(rewrite: Rewrite) -> Value {
        match rewrite {
            Rewrite::Rewritten(body) => serde_json::from_slice(&body).unwrap(),
            other => panic!("expected rewrite, got {other:?}"),
        }
    }

    #[test]
    fn test_messages_passthrough_is_unchanged() {
        let body = br#"{"model":"mystery-model","max_tokens":10,"messages":[{"role":"user","content":"hi"}]}"#;
        let rewrite = rewrite_messages(body, &ModelTranslator::new());
        assert_eq!(rewrite, Rewrite::Unchanged);
        let original = Bytes::from_static(body);
        assert_eq!(rewrite.into_body(original.clone()), original);
    }

    #[test]
    fn test_messages_maps_model() {
        let body = br#"{"model":"claude-opus-4-5-20251101","messages":[]}"#;
        let rewritten = parse(rewrite_messages(body, &ModelTranslator::new()));
        assert_eq!(rewritten["model"], OPUS_THINKING);
        assert_eq!(rewritten["messages"], json!([]));
    }

    #[test]
    fn test_messages_normalizes_input_schema() {
        let body = serde_json::to_vec(&json!({
            "model": "mystery",
            "tools": [
                {"name": "read", "input_schema": {"type": "object", "$schema": "x", "properties": {"p": {"type": ["string", "null"]}}}},
                {"name": "noop", "input_schema": {"type": "object"}}
            ]
        }))
        .unwrap();
        let rewritten = parse(rewrite_messages(&body, &ModelTranslator::new()));
        assert_eq!(rewritten["model"], "mystery");
        assert_eq!(rewritten["tools"][0]["input_schema"]["properties"]["p"]["type"], "string");
        assert_eq!(rewritten["tools"][0]["input_schema"]["$schema"], "x");
        assert_eq!(rewritten["tools"][1]["input_schema"], json!({"type": "object"}));
    }

    #[test]
    fn test_messages_with_valid_tools_is_unchanged() {
        let body = br#"{"model":"x","tools":[{"name":"t","input_schema":{"type":"object","properties":{}}}]}"#;
        assert_eq!(rewrite_messages(body, &ModelTranslator::new()), Rewrite::Unchanged);
    }

    #[test]
    fn test_messages_non_json_is_forwarded() {
        assert_eq!(rewrite_messages(b"{oops", &ModelTranslator::new()), Rewrite::NotJson);
        assert_eq!(rewrite_messages(b"[1,2]", &ModelTranslator::new()), Rewrite::NotJson);
    }

    #[test]
    fn test_messages_tolerates_odd_tools() {
        let body = br#"{"model":"x","tools":null}"#;
        assert_eq!(rewrite_messages(body, &ModelTranslator::new()), Rewrite::Unchanged);
        let body = br#"{"model":"x","tools":[1,"a",{"name":"t"},{"input_schema":"str"}]}"#;
        assert_eq!(rewrite_messages(body, &ModelTranslator::new()), Rewrite::Unchanged);
    }

    #[test]
    fn test_chat_normalizes_function_parameters() {
        let body = serde_json::to_vec(&json!({
            "model": "gpt-4o",
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {
                "type": "object",
                "properties": {"x": {"anyOf": [{"type": "null"}, {"type": "integer"}]}}
            }}}]
        }))
        .unwrap();
        let rewritten = parse(rewrite_chat_completions(&body));
        assert_eq!(rewritten["model"], "gpt-4o");
        assert_eq!(
            rewritten["tools"][0]["function"]["parameters"]["properties"]["x"],
            json!({"type": "integer"})
        );
    }

    #[test]
    fn test_chat_without_tools_is_unchanged() {
        assert_eq!(
            rewrite_chat_completions(br#"{"model":"gpt-4","messages":[]}"#),
            Rewrite::Unchanged
        );
        assert_eq!(
            rewrite_chat_completions(br#"{"model":"gpt-4","tools":[]}"#),
            Rewrite::Unchanged
        );
        assert_eq!(rewrite_chat_completions(b"not json"), Rewrite::NotJson);
    }

    #[test]
    fn test_count_tokens_maps_model_and_normalizes() {
        let body = serde_json::to_vec(&json!({
            "model": "claude-sonnet-4-5-20250929",
            "messages": [],
            "tools": [{"name": "t", "input_schema": {"type": "object", "$defs": {}}}]
        }))
        .unwrap();
        let rewritten = parse(rewrite_count_tokens(&body, &ModelTranslator::new()).unwrap());
        assert_eq!(rewritten["model"], SONNET_THINKING);
        assert_eq!(rewritten["tools"][0]["input_schema"], json!({"type": "object"}));
    }

    #[test]
    fn test_count_tokens_rejects_invalid_json() {
        assert!(rewrite_count_tokens(b"{", &ModelTranslator::new()).is_err());
    }
}
