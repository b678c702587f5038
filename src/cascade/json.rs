//! Extraction of JSON from model answers.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{NexusError, NexusResult};

fn strip_fences(text: &str) -> String {
    text.replace("```json", "").replace("```JSON", "").replace("```", "")
}

/// Returns the first well-formed JSON object in `text`, ignoring prose and
/// markdown fences around it.
pub fn extract_object(text: &str) -> Option<Value> {
    let cleaned = strip_fences(text);
    cleaned
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(idx, _)| {
            let mut stream = serde_json::Deserializer::from_str(&cleaned[idx..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value @ Value::Object(_))) => Some(value),
                _ => None,
            }
        })
}

/// Like [`extract_object`], but falls back to parsing the whole (unfenced)
/// answer as any JSON value.
pub fn extract_value(text: &str) -> Option<Value> {
    extract_object(text).or_else(|| serde_json::from_str(strip_fences(text).trim()).ok())
}

/// Extracts JSON from `text` and deserializes it into `T`.
pub fn parse_answer<T: DeserializeOwned>(text: &str) -> NexusResult<T> {
    let value = extract_value(text).ok_or_else(|| NexusError::InvalidJson {
        message: "no JSON found in response".to_string(),
        raw: text.to_string(),
    })?;

    serde_json::from_value(value).map_err(|e| NexusError::InvalidJson {
        message: e.to_string(),
        raw: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_extracts_from_prose() {
        let text = "Here is the analysis: {\"score\": 80, \"ok\": true} Hope it helps {not json}";
        assert_eq!(extract_object(text), Some(json!({"score": 80, "ok": true})));
    }

    #[test]
    fn test_extracts_from_fenced_block() {
        let text = "```json\n{\n  \"verdict\": \"kept\",\n  \"items\": [1, 2]\n}\n```";
        assert_eq!(extract_object(text), Some(json!({"verdict": "kept", "items": [1, 2]})));
    }

    #[test]
    fn test_skips_malformed_braces() {
        let text = "{broken {\"a\": {\"b\": 1}}";
        assert_eq!(extract_object(text), Some(json!({"a": {"b": 1}})));
    }

    #[test]
    fn test_value_fallback_for_non_objects() {
        assert_eq!(extract_value("```\n[1, 2, 3]\n```"), Some(json!([1, 2, 3])));
        assert_eq!(extract_value("no json here"), None);
    }

    #[test]
    fn test_parse_answer_errors_carry_raw_text() {
        #[derive(Debug, serde::Deserialize)]
        struct Verdict {
            #[allow(dead_code)]
            score: u8,
        }

        match parse_answer::<Verdict>("I could not decide.") {
            Err(NexusError::InvalidJson { raw, .. }) => assert_eq!(raw, "I could not decide."),
            other => panic!("unexpected result: {other:?}"),
        }
        match parse_answer::<Verdict>("{\"score\": \"high\"}") {
            Err(NexusError::InvalidJson { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
