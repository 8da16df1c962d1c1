use std::error::Error as StdError;
use std::time::Duration;

use http::header::CONTENT_LENGTH;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::runtime::Handle;
use tracing::debug;

use crate::NetResult;
use crate::error::{NetworkError, TransportError, TransportErrorKind};
use crate::transport::body::{ReqBody, build_http_request, read_all_body, wire_req_body};
use crate::transport::{
    ResponseHead, Transport, TransportCompletion, TransportHandle, TransportResponse,
    TransportResult,
};
use crate::wire::WireRequest;

type HttpsClient = Client<HttpsConnector<HttpConnector>, ReqBody>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    RustlsRing,
    RustlsAwsLcRs,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RustlsRing => "rustls-ring",
            Self::RustlsAwsLcRs => "rustls-aws-lc-rs",
        }
    }
}

impl Default for TlsBackend {
    fn default() -> Self {
        if cfg!(feature = "tls-rustls-ring") {
            Self::RustlsRing
        } else {
            Self::RustlsAwsLcRs
        }
    }
}

/// Default [`Transport`] on hyper with rustls, driven by a tokio runtime.
#[derive(Clone)]
pub struct HyperTransport {
    client: HttpsClient,
    runtime: Handle,
    backend: TlsBackend,
}

impl HyperTransport {
    /// Uses the current tokio runtime; fails outside of one.
    pub fn new() -> NetResult<Self> {
        Self::with_backend(TlsBackend::default())
    }

    pub fn with_backend(backend: TlsBackend) -> NetResult<Self> {
        let runtime = Handle::try_current().map_err(|_| NetworkError::RuntimeUnavailable)?;
        Self::with_runtime(runtime, backend)
    }

    pub fn with_runtime(runtime: Handle, backend: TlsBackend) -> NetResult<Self> {
        let tls_config = build_rustls_tls_config(backend)?;
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);
        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self {
            client,
            runtime,
            backend,
        })
    }

    pub fn tls_backend(&self) -> TlsBackend {
        self.backend
    }
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Transport for HyperTransport {
    fn submit(
        &self,
        request: WireRequest,
        handle: TransportHandle,
        completion: TransportCompletion,
    ) {
        let client = self.client.clone();
        self.runtime.spawn(async move {
            let timeout = request.timeout();
            let result = tokio::select! {
                biased;
                _ = handle.cancelled() => Err(TransportError::cancelled()),
                result = exchange_with_timeout(&client, request, timeout) => result,
            };
            debug!(
                handle = %handle.id(),
                ok = result.is_ok(),
                "hyper transport attempt finished"
            );
            completion.complete(result);
        });
    }
}

async fn exchange_with_timeout(
    client: &HttpsClient,
    request: WireRequest,
    timeout: Duration,
) -> TransportResult {
    if timeout.is_zero() {
        return exchange(client, request).await;
    }
    match tokio::time::timeout(timeout, exchange(client, request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::timed_out(timeout.as_millis())),
    }
}

async fn exchange(client: &HttpsClient, mut request: WireRequest) -> TransportResult {
    let upload_progress = request.upload_progress_hook().cloned();
    let body = wire_req_body(request.take_body(), upload_progress)
        .await
        .map_err(|error| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("failed to open request body: {error}"),
            )
        })?;
    let http_request = build_http_request(
        request.method().clone(),
        request.uri().clone(),
        request.headers(),
        body,
    )
    .map_err(|error| TransportError::new(TransportErrorKind::Other, error.to_string()))?;

    let response = client.request(http_request).await.map_err(|error| {
        TransportError::new(classify_transport_error(&error), error_chain(&error))
    })?;

    let (parts, incoming) = response.into_parts();
    let total = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let body = read_all_body(incoming, total, request.download_progress_hook())
        .await
        .map_err(|error| TransportError::new(TransportErrorKind::Read, error_chain(&error)))?;

    Ok(TransportResponse {
        head: ResponseHead {
            status: parts.status,
            headers: parts.headers,
            url: request.uri_text().to_owned(),
        },
        body,
    })
}

fn error_chain(error: &dyn StdError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    let text = error_chain(error).to_ascii_lowercase();
    if error.is_connect() {
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
            || text.contains("nodename nor servname")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("connection closed")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn build_rustls_tls_config(backend: TlsBackend) -> NetResult<rustls::ClientConfig> {
    let provider = match backend {
        #[cfg(feature = "tls-rustls-ring")]
        TlsBackend::RustlsRing => rustls::crypto::ring::default_provider(),
        #[cfg(feature = "tls-rustls-aws-lc-rs")]
        TlsBackend::RustlsAwsLcRs => rustls::crypto::aws_lc_rs::default_provider(),
        #[allow(unreachable_patterns)]
        unavailable => {
            return Err(NetworkError::TlsBackendInit {
                backend: unavailable.as_str(),
                message: "backend was not enabled at compile time".to_owned(),
            });
        }
    };

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(provider.into())
        .with_safe_default_protocol_versions()
        .map_err(|source| NetworkError::TlsBackendInit {
            backend: backend.as_str(),
            message: source.to_string(),
        })?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Ok(config)
}
