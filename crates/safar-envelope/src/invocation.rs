//! Inbound invocation normalization: heterogeneous wire shapes fold into one
//! canonical `(action_group, api_path, parameter_map)` triple.
use std::collections::BTreeMap;

use serde_json::Value;

use crate::EnvelopeError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// The caller-supplied routing identifiers, echoed verbatim on every response.
pub struct EnvelopeIdentifiers {
    pub action_group: Option<String>,
    pub api_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// Canonical form of one inbound action invocation.
pub struct NormalizedInvocation {
    pub identifiers: EnvelopeIdentifiers,
    pub session_id: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub session_attributes: BTreeMap<String, Value>,
}

/// Extracts routing identifiers leniently, even from events that fail full
/// normalization, so error envelopes still echo whatever the caller sent.
pub fn extract_identifiers(event: &Value) -> EnvelopeIdentifiers {
    EnvelopeIdentifiers {
        action_group: non_empty_string_field(event, "actionGroup"),
        api_path: non_empty_string_field(event, "apiPath"),
    }
}

/// Normalizes a raw inbound event into the canonical invocation form.
///
/// Two parameter shapes are accepted, in precedence order: a flat top-level
/// `parameters` list of `{name, value}` records, then
/// `requestBody.content["application/json"].properties`. When neither shape
/// matches the event is rejected outright rather than defaulting to an empty
/// parameter map.
pub fn normalize_invocation(event: &Value) -> Result<NormalizedInvocation, EnvelopeError> {
    let Some(object) = event.as_object() else {
        return Err(EnvelopeError::MalformedPayload(
            "event is not a JSON object".to_string(),
        ));
    };

    let entries = match object.get("parameters").and_then(Value::as_array) {
        Some(flat) if !flat.is_empty() => flat,
        _ => nested_properties(object).ok_or_else(|| {
            EnvelopeError::MalformedPayload(
                "neither a flat parameters list nor requestBody properties are present"
                    .to_string(),
            )
        })?,
    };

    let mut parameters = BTreeMap::new();
    for entry in entries {
        let Some(record) = entry.as_object() else {
            continue;
        };
        let Some(name) = record.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(value) = record.get("value").and_then(scalar_to_string) else {
            continue;
        };
        // Duplicate names: last write wins.
        parameters.insert(name.to_string(), value);
    }

    let session_attributes = object
        .get("sessionAttributes")
        .and_then(Value::as_object)
        .map(|attributes| {
            attributes
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    Ok(NormalizedInvocation {
        identifiers: extract_identifiers(event),
        session_id: non_empty_string_field(event, "sessionId"),
        parameters,
        session_attributes,
    })
}

fn nested_properties(object: &serde_json::Map<String, Value>) -> Option<&Vec<Value>> {
    object
        .get("requestBody")?
        .get("content")?
        .get("application/json")?
        .get("properties")?
        .as_array()
}

fn non_empty_string_field(event: &Value, field: &str) -> Option<String> {
    event
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
