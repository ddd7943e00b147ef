//! Reply parsing.
//!
//! Models often wrap JSON in prose or code fences. The payload is the
//! outermost `{ … }` of the reply text; `referenced_sources` is split off it.

use serde_json::Value;

use pipeline::{GenerationError, GenerationResponse};

const REFERENCES: &str = "referenced_sources";

/// Extracts the step payload and referenced sources from reply text.
///
/// # Errors
///
/// [`GenerationError::InvalidResponse`] if the text holds no JSON object.
pub fn parse_reply(text: &str) -> Result<GenerationResponse, GenerationError> {
    let invalid = |message: &str| GenerationError::InvalidResponse(message.to_string());
    let start = text
        .find('{')
        .ok_or_else(|| invalid("reply contains no JSON object"))?;
    let end = text
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| invalid("reply JSON object is not closed"))?;

    let mut payload: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| GenerationError::InvalidResponse(format!("reply is not valid JSON: {e}")))?;

    let referenced_sources = match payload.as_object_mut().and_then(|o| o.remove(REFERENCES)) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    Ok(GenerationResponse {
        payload,
        referenced_sources,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fenced_reply_is_unwrapped() {
        let text = "Here is the plan:\n```json\n\
                    {\"summary\": \"ok\", \"referenced_sources\": [\"strategy\", 3]}\n```";
        let reply = parse_reply(text).unwrap();
        assert_eq!(reply.payload, json!({ "summary": "ok" }));
        assert_eq!(reply.referenced_sources, vec!["strategy"]);
    }

    #[test]
    fn missing_references_are_empty() {
        let reply = parse_reply("{\"days\": []}").unwrap();
        assert!(reply.referenced_sources.is_empty());
        assert_eq!(reply.payload, json!({ "days": [] }));
    }

    #[test]
    fn prose_without_json_is_invalid() {
        assert!(matches!(
            parse_reply("I cannot help with that."),
            Err(GenerationError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_reply("{\"summary\": "),
            Err(GenerationError::InvalidResponse(_))
        ));
    }
}
