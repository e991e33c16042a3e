use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderMap, StatusCode};

/// What the gateway hands back to the HTTP façade: either a body already
/// fully buffered, or a chunk stream to forward as it arrives.
pub enum GatewayResponse {
    Buffered {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Stream {
        status: StatusCode,
        headers: HeaderMap,
        body: Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>,
    },
}

impl GatewayResponse {
    pub fn service_unavailable(message: &'static str) -> Self {
        Self::Buffered {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers: HeaderMap::new(),
            body: Bytes::from_static(message.as_bytes()),
        }
    }

    pub fn forbidden(message: &'static str) -> Self {
        Self::Buffered {
            status: StatusCode::FORBIDDEN,
            headers: HeaderMap::new(),
            body: Bytes::from_static(message.as_bytes()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayResponse::Buffered { status, .. } => *status,
            GatewayResponse::Stream { status, .. } => *status,
        }
    }
}

pub const EXHAUSTED_BODY: &str = "All backends exhausted or unavailable";
pub const FORBIDDEN_BODY: &str = "forbidden";
