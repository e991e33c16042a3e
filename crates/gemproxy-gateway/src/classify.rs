/// C5: which upstream a request belongs to, decided from the path alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Vertex,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Vertex => "vertex",
        }
    }
}

/// Everything C6 needs to know about a request's shape before it picks a
/// credential: which upstream, what to log it as, and whether to stream.
#[derive(Debug, Clone)]
pub struct Classification {
    pub provider: Provider,
    pub model: String,
    pub action: Option<String>,
    pub is_stream: bool,
}

const MODEL_FALLBACK: &str = "unknown";
pub const STREAM_ACTION: &str = "streamGenerateContent";
pub const LRO_START_ACTION: &str = "predictLongRunning";
pub const LRO_POLL_ACTION: &str = "fetchPredictOperation";

/// Path is classified Vertex iff it contains the literal `projects/` segment;
/// this requires no body inspection.
pub fn classify(path: &str) -> Classification {
    let path = path.trim_start_matches('/');
    let provider = if path.contains("projects/") {
        Provider::Vertex
    } else {
        Provider::Gemini
    };

    let action = extract_action(path);
    let model = extract_model(path).unwrap_or_else(|| MODEL_FALLBACK.to_string());
    let is_stream = action.as_deref() == Some(STREAM_ACTION);

    Classification {
        provider,
        model,
        action,
        is_stream,
    }
}

/// The path component after the final `:`, e.g. `...:generateContent` -> `generateContent`.
fn extract_action(path: &str) -> Option<String> {
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    last_segment.rsplit_once(':').map(|(_, action)| action.to_string())
}

/// The path component immediately after `models/`, up to the first `:`.
fn extract_model(path: &str) -> Option<String> {
    let (_, rest) = path.split_once("models/")?;
    let model = rest.split('/').next().unwrap_or(rest);
    let model = model.split_once(':').map(|(m, _)| m).unwrap_or(model);
    if model.is_empty() {
        None
    } else {
        Some(model.to_string())
    }
}

/// For Vertex LRO polls: pulls `operationName` out of the client request body.
pub fn extract_operation_name_from_request(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("operationName")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// For Vertex LRO starts: pulls `name` out of the upstream response body.
pub fn extract_operation_name_from_response(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("name").and_then(|v| v.as_str()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_path_without_projects_segment() {
        let c = classify("v1beta/models/gemini-pro:generateContent");
        assert_eq!(c.provider, Provider::Gemini);
        assert_eq!(c.model, "gemini-pro");
        assert_eq!(c.action.as_deref(), Some("generateContent"));
        assert!(!c.is_stream);
    }

    #[test]
    fn vertex_path_with_projects_segment() {
        let c = classify("v1/projects/IGNORED/locations/us-central1/publishers/google/models/imagen-3.0:predict");
        assert_eq!(c.provider, Provider::Vertex);
        assert_eq!(c.model, "imagen-3.0");
        assert_eq!(c.action.as_deref(), Some("predict"));
    }

    #[test]
    fn stream_action_is_detected() {
        let c = classify("v1beta/models/gemini-pro:streamGenerateContent");
        assert!(c.is_stream);
    }

    #[test]
    fn missing_models_segment_falls_back_to_unknown() {
        let c = classify("v1beta/somethingelse");
        assert_eq!(c.model, "unknown");
    }

    #[test]
    fn parses_operation_name_from_request_and_response() {
        let req = br#"{"operationName":"projects/999/locations/x/operations/OP1"}"#;
        assert_eq!(
            extract_operation_name_from_request(req).as_deref(),
            Some("projects/999/locations/x/operations/OP1")
        );
        let resp = br#"{"name":"projects/999/locations/x/operations/OP1"}"#;
        assert_eq!(
            extract_operation_name_from_response(resp).as_deref(),
            Some("projects/999/locations/x/operations/OP1")
        );
    }
}
