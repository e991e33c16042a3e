use serde_json::Value;

/// Token counts lifted out of a Gemini/Vertex response body. Any field the
/// response did not carry, or that failed to parse, is left `None` — a parse
/// failure here is never an error, only a loss of telemetry detail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub prompt_tokens: Option<i32>,
    pub candidates_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

/// Parses `usageMetadata` out of a response body.
///
/// Handles both the buffered shape (a single JSON object) and the streaming
/// shape (a JSON array of chunk objects, scanned from the end for the first
/// element that carries `usageMetadata` — the last chunk of a Gemini stream
/// carries the cumulative totals).
pub fn parse_usage_metadata(body: &[u8]) -> UsageCounts {
    let text = String::from_utf8_lossy(body);
    let Ok(value) = serde_json::from_str::<Value>(&text) else {
        return UsageCounts::default();
    };

    let usage = match &value {
        Value::Object(map) => map.get("usageMetadata"),
        Value::Array(items) => items
            .iter()
            .rev()
            .find_map(|item| item.get("usageMetadata")),
        _ => None,
    };

    let Some(usage) = usage else {
        return UsageCounts::default();
    };

    UsageCounts {
        prompt_tokens: usage.get("promptTokenCount").and_then(Value::as_i64).map(|v| v as i32),
        candidates_tokens: usage
            .get("candidatesTokenCount")
            .and_then(Value::as_i64)
            .map(|v| v as i32),
        total_tokens: usage.get("totalTokenCount").and_then(Value::as_i64).map(|v| v as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_top_level_object() {
        let body = br#"{"candidates":[],"usageMetadata":{"promptTokenCount":2,"candidatesTokenCount":5,"totalTokenCount":7}}"#;
        let usage = parse_usage_metadata(body);
        assert_eq!(usage.prompt_tokens, Some(2));
        assert_eq!(usage.candidates_tokens, Some(5));
        assert_eq!(usage.total_tokens, Some(7));
    }

    #[test]
    fn scans_streaming_array_from_the_end() {
        let body = br#"[{"candidates":[]},{"candidates":[],"usageMetadata":{"totalTokenCount":9}}]"#;
        let usage = parse_usage_metadata(body);
        assert_eq!(usage.total_tokens, Some(9));
        assert_eq!(usage.prompt_tokens, None);
    }

    #[test]
    fn malformed_body_yields_all_nulls_not_an_error() {
        let usage = parse_usage_metadata(b"not json at all");
        assert_eq!(usage, UsageCounts::default());
    }

    #[test]
    fn array_with_no_usage_metadata_yields_nulls() {
        let usage = parse_usage_metadata(br#"[{"candidates":[]},{"candidates":[]}]"#);
        assert_eq!(usage, UsageCounts::default());
    }
}
