use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::errors::TokenError;
use crate::vertex::VertexCredential;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
/// Refresh this far ahead of the real expiry so a request in flight never
/// races a token that dies mid-call.
const EXPIRY_SAFETY_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    bearer: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_SAFETY_WINDOW < self.expires_at
    }
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// C2: exchanges a Vertex service account for a short-lived OAuth2 bearer and
/// caches it per credential. Single-flight per `project_id` — concurrent
/// callers racing an expired token coalesce into one refresh.
pub struct TokenCache {
    client: Arc<wreq::Client>,
    entries: RwLock<HashMap<String, Arc<AsyncMutex<Option<CachedToken>>>>>,
}

impl TokenCache {
    pub fn new(client: Arc<wreq::Client>) -> Self {
        Self {
            client,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn slot_for(&self, project_id: &str) -> Arc<AsyncMutex<Option<CachedToken>>> {
        if let Some(slot) = self.entries.read().expect("token cache lock poisoned").get(project_id) {
            return slot.clone();
        }
        let mut guard = self.entries.write().expect("token cache lock poisoned");
        guard
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Returns a currently-valid bearer token for `cred`, refreshing if the
    /// cached one is absent or within the expiry safety window. A refresh
    /// failure is propagated; the stale token is never served as a fallback.
    pub async fn get_token(&self, cred: &VertexCredential) -> Result<String, TokenError> {
        let slot = self.slot_for(&cred.project_id);
        let mut guard = slot.lock().await;

        if let Some(cached) = guard.as_ref()
            && cached.is_fresh()
        {
            return Ok(cached.bearer.clone());
        }

        let fresh = refresh(&self.client, cred).await?;
        let bearer = fresh.bearer.clone();
        *guard = Some(fresh);
        Ok(bearer)
    }
}

async fn refresh(client: &wreq::Client, cred: &VertexCredential) -> Result<CachedToken, TokenError> {
    let assertion = sign_assertion(cred.clone()).await?;
    let token_uri = cred.token_uri.clone();

    let response = client
        .post(&token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await
        .map_err(|err| TokenError::Network(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TokenError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|err| TokenError::Network(err.to_string()))?;

    Ok(CachedToken {
        bearer: parsed.access_token,
        expires_at: Instant::now() + Duration::from_secs(parsed.expires_in.max(0) as u64),
    })
}

/// RS256-signs the assertion JWT. This is CPU-bound crypto; it runs on the
/// blocking worker pool so it never stalls the request reactor.
async fn sign_assertion(cred: VertexCredential) -> Result<String, TokenError> {
    tokio::task::spawn_blocking(move || sign_assertion_blocking(&cred))
        .await
        .map_err(|err| TokenError::SigningFailed(err.to_string()))?
}

fn sign_assertion_blocking(cred: &VertexCredential) -> Result<String, TokenError> {
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    let claims = Claims {
        iss: cred.client_email.clone(),
        scope: CLOUD_PLATFORM_SCOPE.to_string(),
        aud: cred.token_uri.clone(),
        iat: now,
        exp: now + ASSERTION_LIFETIME.as_secs() as i64,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = cred.private_key_id.clone();

    let key = EncodingKey::from_rsa_pem(cred.private_key.as_bytes())
        .map_err(|err| TokenError::InvalidKey(err.to_string()))?;

    encode(&header, &claims, &key).map_err(|err| TokenError::SigningFailed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cred(project_id: &str, token_uri: &str) -> VertexCredential {
        VertexCredential {
            project_id: project_id.to_string(),
            client_email: format!("svc@{project_id}.iam.gserviceaccount.com"),
            private_key: test_rsa_pem(),
            private_key_id: Some("kid-1".to_string()),
            token_uri: token_uri.to_string(),
            source_path: PathBuf::from("test.json"),
        }
    }

    fn test_rsa_pem() -> String {
        include_str!("testdata/test_rsa_key.pem").to_string()
    }

    #[tokio::test]
    async fn signs_a_well_formed_rs256_assertion() {
        let credential = cred("proj-sign", "https://oauth2.googleapis.com/token");
        let assertion = sign_assertion(credential).await.unwrap();
        assert_eq!(assertion.split('.').count(), 3);
    }

    #[tokio::test]
    async fn refresh_failure_does_not_poison_the_cache_with_a_stale_token() {
        let client = Arc::new(wreq::Client::builder().build().unwrap());
        let cache = TokenCache::new(client);
        let credential = cred("proj-fail", "http://127.0.0.1:0/token");
        let err = cache.get_token(&credential).await;
        assert!(err.is_err());
    }
}
