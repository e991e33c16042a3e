/// C1 load-time failures for a single credential entry. The store logs these
/// and skips the offending entry; it never aborts the whole `load()`.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum RotatorError {
    #[error("credential pool is empty")]
    EmptyPool,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to sign token assertion: {0}")]
    SigningFailed(String),
    #[error("invalid private key material: {0}")]
    InvalidKey(String),
    #[error("network failure talking to token endpoint: {0}")]
    Network(String),
    #[error("token endpoint rejected the assertion (status {status}): {body}")]
    Rejected { status: u16, body: String },
}
