use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Timeout,
    Dns,
    Connect,
    Tls,
    Read,
    Cancelled,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }

    /// Networking conditions that may succeed when the same request is sent again.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Dns | Self::Connect | Self::Tls | Self::Read
        )
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Failure reported by a [`Transport`](crate::Transport) for one unit of work.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "request cancelled")
    }

    pub fn timed_out(timeout_ms: u128) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {timeout_ms}ms"),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TransportErrorKind::Cancelled
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NetworkErrorCode {
    InvalidRequest,
    InvalidHeaderName,
    InvalidHeaderValue,
    EncodingFailure,
    BodyMaterialization,
    Cancelled,
    TransientTransport,
    Transport,
    Unauthorized,
    FailedResponse,
    DecodingFailure,
    RuntimeUnavailable,
    TlsBackendInit,
}

impl NetworkErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::EncodingFailure => "encoding_failure",
            Self::BodyMaterialization => "body_materialization",
            Self::Cancelled => "cancelled",
            Self::TransientTransport => "transient_transport",
            Self::Transport => "transport",
            Self::Unauthorized => "unauthorized",
            Self::FailedResponse => "failed_response",
            Self::DecodingFailure => "decoding_failure",
            Self::RuntimeUnavailable => "runtime_unavailable",
            Self::TlsBackendInit => "tls_backend_init",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NetworkError {
    #[error("invalid request url: {uri}")]
    InvalidUrl { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to encode request body: {source}")]
    Encoding {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to materialize request body: {source}")]
    BodyMaterialization {
        #[source]
        source: std::io::Error,
    },
    #[error("request was cancelled")]
    Cancelled,
    #[error("http transport error ({kind}) for {method} {uri}: {message}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        message: String,
    },
    #[error("unauthorized (401) for {method} {uri}")]
    Unauthorized {
        method: Method,
        uri: String,
        headers: Box<HeaderMap>,
        body: Bytes,
    },
    #[error("http status error {status} for {method} {uri}")]
    FailedResponse {
        status: u16,
        method: Method,
        uri: String,
        headers: Box<HeaderMap>,
        body: Bytes,
    },
    #[error("failed to decode response body: {message}")]
    Decoding { message: String, body: Bytes },
    #[error("no tokio runtime is available to drive the http transport")]
    RuntimeUnavailable,
    #[error("failed to initialize tls backend {backend}: {message}")]
    TlsBackendInit {
        backend: &'static str,
        message: String,
    },
}

impl NetworkError {
    pub const fn code(&self) -> NetworkErrorCode {
        match self {
            Self::InvalidUrl { .. } => NetworkErrorCode::InvalidRequest,
            Self::InvalidHeaderName { .. } => NetworkErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => NetworkErrorCode::InvalidHeaderValue,
            Self::Encoding { .. } => NetworkErrorCode::EncodingFailure,
            Self::BodyMaterialization { .. } => NetworkErrorCode::BodyMaterialization,
            Self::Cancelled => NetworkErrorCode::Cancelled,
            Self::Transport { kind, .. } => {
                if kind.is_transient() {
                    NetworkErrorCode::TransientTransport
                } else {
                    NetworkErrorCode::Transport
                }
            }
            Self::Unauthorized { .. } => NetworkErrorCode::Unauthorized,
            Self::FailedResponse { .. } => NetworkErrorCode::FailedResponse,
            Self::Decoding { .. } => NetworkErrorCode::DecodingFailure,
            Self::RuntimeUnavailable => NetworkErrorCode::RuntimeUnavailable,
            Self::TlsBackendInit { .. } => NetworkErrorCode::TlsBackendInit,
        }
    }

    pub(crate) fn from_transport(error: TransportError, method: &Method, uri: &str) -> Self {
        if error.is_cancelled() {
            return Self::Cancelled;
        }
        Self::Transport {
            kind: error.kind,
            method: method.clone(),
            uri: uri.to_owned(),
            message: error.message,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Transport failures of a transient kind. Status-based retries (503 by
    /// default) are decided by the client's [`RetryPolicy`](crate::RetryPolicy).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { kind, .. } if kind.is_transient())
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            Self::FailedResponse { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Unauthorized { body, .. }
            | Self::FailedResponse { body, .. }
            | Self::Decoding { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Self::Unauthorized { headers, .. } | Self::FailedResponse { headers, .. } => {
                Some(headers)
            }
            _ => None,
        }
    }
}
