use std::fs;
use std::io;
use std::path::Path;

use fernet::Fernet;

/// Decrypts the `encrypted_keys` envelope written by the Fernet-based key
/// vault. The master key is a single Fernet key persisted on disk; it is
/// generated on first run if the file does not exist.
pub struct MasterCipher {
    fernet: Fernet,
}

impl MasterCipher {
    pub fn load_or_create(key_file: &Path) -> io::Result<Self> {
        let key = match fs::read_to_string(key_file) {
            Ok(contents) => contents.trim().to_string(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let generated = Fernet::generate_key();
                if let Some(parent) = key_file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(key_file, &generated)?;
                restrict_permissions(key_file)?;
                generated
            }
            Err(err) => return Err(err),
        };
        let fernet = Fernet::new(&key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "master key is not a valid fernet key"))?;
        Ok(Self { fernet })
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        let bytes = self
            .fernet
            .decrypt(ciphertext)
            .map_err(|_| DecryptError::InvalidToken)?;
        String::from_utf8(bytes).map_err(|_| DecryptError::InvalidUtf8)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    #[error("ciphertext is not a valid fernet token")]
    InvalidToken,
    #[error("decrypted payload is not valid utf-8")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_generated_key() {
        let dir = std::env::temp_dir().join(format!("gemproxy-master-key-test-{}", std::process::id()));
        let key_file = dir.join("master.key");
        let cipher = MasterCipher::load_or_create(&key_file).unwrap();

        let token = cipher.fernet_encrypt_for_test("AIzaSecretValue");
        let decrypted = cipher.decrypt(&token).unwrap();
        assert_eq!(decrypted, "AIzaSecretValue");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn garbage_ciphertext_is_rejected_without_panicking() {
        let dir = std::env::temp_dir().join(format!("gemproxy-master-key-test2-{}", std::process::id()));
        let key_file = dir.join("master.key");
        let cipher = MasterCipher::load_or_create(&key_file).unwrap();

        assert!(cipher.decrypt("not-a-real-token").is_err());

        let _ = fs::remove_dir_all(&dir);
    }

    impl MasterCipher {
        fn fernet_encrypt_for_test(&self, plaintext: &str) -> String {
            self.fernet.encrypt(plaintext.as_bytes())
        }
    }
}
