use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::encryption::MasterCipher;
use crate::errors::RotatorError;

#[derive(Debug, Clone)]
pub struct GeminiCredential {
    pub api_key: String,
}

impl GeminiCredential {
    /// Identity used in telemetry: never the key itself.
    pub fn identity(&self) -> String {
        let tail_len = self.api_key.len().min(4);
        format!("...{}", &self.api_key[self.api_key.len() - tail_len..])
    }
}

/// Round-robin selector over the live pool of Gemini API keys, with a
/// `load`/`reload` that atomically swaps the pool out from under in-flight
/// requests (they keep the snapshot they already took).
pub struct GeminiRotator {
    dir: PathBuf,
    cipher: Option<Arc<MasterCipher>>,
    pool: ArcSwap<Vec<GeminiCredential>>,
    cursor: AtomicUsize,
}

impl GeminiRotator {
    pub fn new(dir: PathBuf, cipher: Option<Arc<MasterCipher>>) -> Self {
        Self {
            dir,
            cipher,
            pool: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn load(&self) {
        let credentials = load_gemini_keys(&self.dir, self.cipher.as_deref());
        self.pool.store(Arc::new(credentials));
        self.cursor.store(0, Ordering::SeqCst);
    }

    pub fn reload(&self) {
        self.load();
    }

    pub fn next(&self) -> Result<GeminiCredential, RotatorError> {
        let snapshot = self.pool.load();
        if snapshot.is_empty() {
            return Err(RotatorError::EmptyPool);
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % snapshot.len();
        Ok(snapshot[idx].clone())
    }

    pub fn count(&self) -> usize {
        self.pool.load().len()
    }
}

fn load_gemini_keys(dir: &Path, cipher: Option<&MasterCipher>) -> Vec<GeminiCredential> {
    let path = dir.join("api_keys.json");
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read gemini api_keys.json");
            return Vec::new();
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to parse gemini api_keys.json");
            return Vec::new();
        }
    };

    if let Some(obj) = value.as_object() {
        if let Some(encrypted) = obj.get("encrypted_keys").and_then(|v| v.as_array()) {
            let Some(cipher) = cipher else {
                tracing::warn!("encrypted_keys envelope present but no master cipher is configured; yielding empty pool");
                return Vec::new();
            };
            let mut out = Vec::with_capacity(encrypted.len());
            for entry in encrypted {
                let Some(token) = entry.as_str() else {
                    continue;
                };
                match cipher.decrypt(token) {
                    Ok(api_key) => out.push(GeminiCredential { api_key }),
                    Err(err) => tracing::error!(error = %err, "skipping gemini key that failed to decrypt"),
                }
            }
            return out;
        }
    }

    if let Some(list) = value.as_array() {
        tracing::warn!("api_keys.json is a plain list; accepted for backward compatibility");
        return list
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| GeminiCredential { api_key: s.to_string() })
            .collect();
    }

    tracing::warn!(path = %path.display(), "api_keys.json has an unrecognized shape, yielding empty pool");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gemproxy-gemini-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_plain_list() {
        let dir = temp_dir("plain");
        fs::write(dir.join("api_keys.json"), r#"["AAAA1111","BBBB2222"]"#).unwrap();
        let rotator = GeminiRotator::new(dir.clone(), None);
        rotator.load();
        assert_eq!(rotator.count(), 2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_yields_empty_pool_not_an_error() {
        let dir = temp_dir("missing");
        let rotator = GeminiRotator::new(dir.clone(), None);
        rotator.load();
        assert_eq!(rotator.count(), 0);
        assert!(matches!(rotator.next(), Err(RotatorError::EmptyPool)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rotation_is_fair_round_robin() {
        let dir = temp_dir("rotation");
        fs::write(dir.join("api_keys.json"), r#"["K1","K2","K3"]"#).unwrap();
        let rotator = GeminiRotator::new(dir.clone(), None);
        rotator.load();

        let mut counts = std::collections::HashMap::new();
        for _ in 0..9 {
            let cred = rotator.next().unwrap();
            *counts.entry(cred.api_key).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 3));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn identity_masks_all_but_last_four_chars() {
        let cred = GeminiCredential { api_key: "AAAAAAAA1234".to_string() };
        assert_eq!(cred.identity(), "...1234");
    }

    #[test]
    fn encrypted_envelope_without_cipher_yields_empty_pool() {
        let dir = temp_dir("envelope-no-cipher");
        fs::write(
            dir.join("api_keys.json"),
            r#"{"encrypted_keys":["gAAAAA=="],"metadata":{"encrypted":true}}"#,
        )
        .unwrap();
        let rotator = GeminiRotator::new(dir.clone(), None);
        rotator.load();
        assert_eq!(rotator.count(), 0);
        let _ = fs::remove_dir_all(&dir);
    }
}
