use http::{HeaderMap, HeaderName, HeaderValue};

/// Headers forwarded upstream, verbatim, if present on the client request.
/// Hop-by-hop headers (`host`, `content-length`, `transfer-encoding`) and any
/// inbound auth are never in this list. `accept-encoding` is deliberately
/// excluded too: wreq only auto-decompresses a response when it chose the
/// `accept-encoding` itself, so forwarding the client's value would turn off
/// decompression and leave us stripping `content-encoding` off a body we
/// never decoded.
const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "content-type",
    "accept",
    "accept-language",
    "user-agent",
    "x-goog-user-project",
];

/// Response headers stripped before handing the upstream reply back to the
/// client. `content-length`/`transfer-encoding` would lie since the proxy
/// doesn't re-chunk; `content-encoding` is stripped because wreq's
/// decompression features (enabled in `Cargo.toml`) already decode the body
/// before we see it.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["content-encoding", "content-length", "transfer-encoding"];

/// C5 rewrite rule: splices `new_project_id` into a `v1(beta\d*)?/projects/<X>/locations/...`
/// path. Paths that don't match this shape are returned unchanged.
pub fn rewrite_vertex_project(path: &str, new_project_id: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let mut segments = trimmed.splitn(4, '/');
    let (Some(version), Some(projects_lit), Some(project_id), Some(rest)) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return path.to_string();
    };

    if !is_versioned_segment(version) || projects_lit != "projects" || !rest.starts_with("locations") {
        return path.to_string();
    }

    let _ = project_id;
    format!("{version}/projects/{new_project_id}/{rest}")
}

fn is_versioned_segment(segment: &str) -> bool {
    if segment == "v1" {
        return true;
    }
    match segment.strip_prefix("v1beta") {
        Some(suffix) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Builds the header set sent upstream: the client allow-list, plus the auth
/// headers the provider needs. Any incoming `Authorization`/`x-goog-api-key`
/// is dropped regardless of what the allow-list would otherwise keep.
pub fn build_upstream_headers(client_headers: &HeaderMap, auth: AuthHeaders) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in FORWARDED_REQUEST_HEADERS {
        if let Some(value) = client_headers.get(*name) {
            if let Ok(header_name) = HeaderName::try_from(*name) {
                out.insert(header_name, value.clone());
            }
        }
    }

    match auth {
        AuthHeaders::Gemini => {}
        AuthHeaders::Vertex { bearer, project_id } => {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {bearer}")) {
                out.insert(http::header::AUTHORIZATION, value);
            }
            if let Ok(value) = HeaderValue::from_str(&project_id) {
                out.insert(
                    HeaderName::from_static("x-goog-user-project"),
                    value,
                );
            }
        }
    }

    out
}

pub enum AuthHeaders {
    Gemini,
    Vertex { bearer: String, project_id: String },
}

/// Appends `key=<api_key>` to a query string (Gemini auth splice).
pub fn splice_gemini_key(query: Option<&str>, api_key: &str) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{q}&key={api_key}"),
        _ => format!("key={api_key}"),
    }
}

pub fn strip_response_headers(headers: &mut HeaderMap) {
    for name in STRIPPED_RESPONSE_HEADERS {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_project_id_in_matching_path() {
        let rewritten = rewrite_vertex_project(
            "v1/projects/IGNORED/locations/us-central1/publishers/google/models/imagen-3.0:predict",
            "real-project",
        );
        assert_eq!(
            rewritten,
            "v1/projects/real-project/locations/us-central1/publishers/google/models/imagen-3.0:predict"
        );
    }

    #[test]
    fn rewrites_versioned_beta_path() {
        let rewritten = rewrite_vertex_project("v1beta1/projects/old/locations/x", "new");
        assert_eq!(rewritten, "v1beta1/projects/new/locations/x");
    }

    #[test]
    fn leaves_non_matching_path_unchanged() {
        let path = "v1beta/models/gemini-pro:generateContent";
        assert_eq!(rewrite_vertex_project(path, "real-project"), path);
    }

    #[test]
    fn header_allowlist_excludes_auth_and_hop_by_hop() {
        let mut client_headers = HeaderMap::new();
        client_headers.insert("content-type", HeaderValue::from_static("application/json"));
        client_headers.insert("authorization", HeaderValue::from_static("Bearer leaked"));
        client_headers.insert("host", HeaderValue::from_static("example.com"));
        client_headers.insert("x-goog-api-key", HeaderValue::from_static("leaked"));
        client_headers.insert("accept-encoding", HeaderValue::from_static("gzip"));

        let upstream = build_upstream_headers(&client_headers, AuthHeaders::Gemini);
        assert!(upstream.contains_key("content-type"));
        assert!(!upstream.contains_key("authorization"));
        assert!(!upstream.contains_key("host"));
        assert!(!upstream.contains_key("x-goog-api-key"));
        assert!(
            !upstream.contains_key("accept-encoding"),
            "client accept-encoding must not override wreq's own, or decompression turns off"
        );
    }

    #[test]
    fn vertex_auth_splices_bearer_and_user_project() {
        let upstream = build_upstream_headers(
            &HeaderMap::new(),
            AuthHeaders::Vertex {
                bearer: "tok123".to_string(),
                project_id: "proj-a".to_string(),
            },
        );
        assert_eq!(upstream.get("authorization").unwrap(), "Bearer tok123");
        assert_eq!(upstream.get("x-goog-user-project").unwrap(), "proj-a");
    }

    #[test]
    fn gemini_key_splice_appends_to_existing_query() {
        assert_eq!(splice_gemini_key(Some("alt=sse"), "AAAA"), "alt=sse&key=AAAA");
        assert_eq!(splice_gemini_key(None, "AAAA"), "key=AAAA");
    }
}
