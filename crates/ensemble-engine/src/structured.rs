//! Structured model output with schema prompting and bounded repair.
//!
//! Coordinators need typed decisions from the model. The model is asked
//! to emit a single JSON object conforming to a schemars-derived schema;
//! if the reply does not parse, exactly one repair attempt quotes the
//! parse error back, after which the caller falls back deterministically.
//! The model is never trusted to stay in-set for agent names.

use ensemble_contract::{ChatModel, Message, ModelError};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Structured decoding errors.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("decision did not parse after {attempts} attempts: {last_error}")]
    Parse { attempts: u32, last_error: String },
}

/// Build the instruction that pins the model to a JSON schema.
pub fn schema_instruction<T: JsonSchema>(task: &str) -> Message {
    let schema = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    Message::system(format!(
        "{task}\n\nRespond with a single JSON object conforming to this schema, \
         with no surrounding prose or code fences:\n{schema}"
    ))
}

/// Ask the model for a typed decision.
///
/// `context` is the conversation the decision is about; the schema
/// instruction is prepended. One repair round-trip is attempted on parse
/// failure before giving up.
pub async fn decide<T>(
    model: &dyn ChatModel,
    task: &str,
    context: &[Message],
) -> Result<T, DecisionError>
where
    T: DeserializeOwned + JsonSchema,
{
    let mut messages = Vec::with_capacity(context.len() + 1);
    messages.push(schema_instruction::<T>(task));
    messages.extend(context.iter().cloned());

    let reply = model.invoke(&messages, &[]).await?;
    let first_error = match parse_decision::<T>(&reply.content) {
        Ok(decision) => return Ok(decision),
        Err(e) => e,
    };

    tracing::warn!(error = %first_error, "structured decision parse failed, attempting repair");
    messages.push(reply);
    messages.push(Message::user(format!(
        "Your previous reply could not be parsed: {first_error}. \
         Respond again with only the JSON object, nothing else."
    )));

    let repaired = model.invoke(&messages, &[]).await?;
    parse_decision::<T>(&repaired.content).map_err(|last_error| DecisionError::Parse {
        attempts: 2,
        last_error,
    })
}

/// Parse a decision out of model text, tolerating fences and prose.
fn parse_decision<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    let candidate = extract_json(content);
    serde_json::from_str(candidate).map_err(|e| e.to_string())
}

/// Slice out the JSON object embedded in model text.
///
/// Strips markdown fences and anything before the first `{` or after the
/// matching last `}`.
fn extract_json(content: &str) -> &str {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
