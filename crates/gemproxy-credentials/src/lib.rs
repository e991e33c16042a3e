pub mod encryption;
pub mod errors;
pub mod gemini;
pub mod token;
pub mod vertex;

pub use encryption::MasterCipher;
pub use errors::{CredentialError, RotatorError, TokenError};
pub use gemini::{GeminiCredential, GeminiRotator};
pub use token::TokenCache;
pub use vertex::{VertexCredential, VertexRotator};
