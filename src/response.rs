use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Response, StatusCode};
use serde::Serialize;
use std::borrow::Cow;
use tracing::{error, warn};

use crate::error::GatewayError;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Transport-neutral reply that an HTTP layer can forward verbatim.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Serializes `payload`; a serialization failure becomes a 500.
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, payload: &T) -> Self {
        match serde_json::to_vec(payload) {
            Ok(body) => Self {
                body,
                ..Self::json_empty(status)
            },
            Err(err) => {
                error!(error = %err, "failed to encode response body");
                Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }

    /// Empty body, JSON content type.
    pub fn json_empty(status: StatusCode) -> Self {
        Self::empty(status).with_header(CONTENT_TYPE, HeaderValue::from_static(JSON))
    }

    pub fn text(status: StatusCode, message: &str) -> Self {
        Self {
            body: format!("{message}\n").into_bytes(),
            ..Self::empty(status).with_header(CONTENT_TYPE, HeaderValue::from_static(TEXT))
        }
    }

    /// Logs the failure and renders the client-safe message.
    pub fn from_error(err: &GatewayError) -> Self {
        let status = err.status();
        if err.is_client_error() {
            warn!(error = %err, status = status.as_u16(), "rejected request");
        } else {
            error!(error = %err, status = status.as_u16(), "request failed");
        }
        Self::text(status, &err.client_message())
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Header value as text; `None` when absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl From<GatewayResponse> for Response<Vec<u8>> {
    fn from(resp: GatewayResponse) -> Self {
        let mut out = Response::new(resp.body);
        *out.status_mut() = resp.status;
        *out.headers_mut() = resp.headers;
        out
    }
}
