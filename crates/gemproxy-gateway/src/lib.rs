pub mod classify;
pub mod engine;
pub mod response;
pub mod rewrite;
pub mod state;

pub use classify::{classify, Classification, Provider};
pub use engine::{handle_request, IncomingRequest};
pub use response::GatewayResponse;
pub use state::AppState;
