use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;

use crate::NetResult;
use crate::codec::encode_json;
use crate::context::CompletionContext;
use crate::error::TransportError;
use crate::multipart::{MultipartBody, MultipartPart};
use crate::transport::{Progress, ResponseHead};
use crate::util::{parse_header_name, parse_header_value};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`NetworkRequest`], stable across retries and used as the
/// task registry key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "req-{}", self.0)
    }
}

#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Raw(Bytes),
    /// Already-serialized JSON; sent with `Content-Type: application/json`.
    Json(Bytes),
    Multipart(MultipartBody),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Raw(body) | Self::Json(body) => body.is_empty(),
            Self::Multipart(body) => body.is_empty(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A callback paired with the context it must run on.
pub(crate) struct Hook<F: ?Sized> {
    pub(crate) callback: Arc<F>,
    pub(crate) context: CompletionContext,
}

impl<F: ?Sized> Clone for Hook<F> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            context: self.context.clone(),
        }
    }
}

pub(crate) type ProgressHook = Hook<dyn Fn(Progress) + Send + Sync + 'static>;
pub(crate) type RawCompletionHook =
    Hook<dyn Fn(Option<ResponseHead>, Option<TransportError>) + Send + Sync + 'static>;

impl ProgressHook {
    pub(crate) fn emit(&self, progress: Progress) {
        let callback = Arc::clone(&self.callback);
        self.context.dispatch(move || callback(progress));
    }
}

impl RawCompletionHook {
    pub(crate) fn emit(&self, head: Option<ResponseHead>, error: Option<TransportError>) {
        let callback = Arc::clone(&self.callback);
        self.context.dispatch(move || callback(head, error));
    }
}

/// Description of one logical HTTP call.
///
/// A zero `timeout` or `max_attempts` inherits the client's default. Headers
/// set here replace client default headers with the same name.
pub struct NetworkRequest {
    id: RequestId,
    method: Method,
    path: String,
    query_items: Vec<(String, String)>,
    query_percent_encoded: bool,
    headers: HeaderMap,
    body: RequestBody,
    timeout: Duration,
    max_attempts: usize,
    credentials: Option<Credentials>,
    log_request: bool,
    log_response: bool,
    upload_progress: Option<ProgressHook>,
    download_progress: Option<ProgressHook>,
    raw_completion: Option<RawCompletionHook>,
}

impl NetworkRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: RequestId::next(),
            method,
            path: path.into(),
            query_items: Vec::new(),
            query_percent_encoded: false,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: Duration::ZERO,
            max_attempts: 0,
            credentials: None,
            log_request: true,
            log_response: true,
            upload_progress: None,
            download_progress: None,
            raw_completion: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Raw(body.into());
        self
    }

    /// Serializes `payload` now; an unserializable value never reaches the
    /// transport.
    pub fn json<T>(mut self, payload: &T) -> NetResult<Self>
    where
        T: Serialize + ?Sized,
    {
        self.body = RequestBody::Json(encode_json(payload)?);
        Ok(self)
    }

    pub fn multipart(mut self, body: MultipartBody) -> Self {
        self.body = RequestBody::Multipart(body);
        self
    }

    /// Appends a part, starting a new multipart body if needed.
    pub fn multipart_part(mut self, part: MultipartPart) -> Self {
        match &mut self.body {
            RequestBody::Multipart(body) => body.add(part),
            _ => self.body = RequestBody::Multipart(MultipartBody::new().part(part)),
        }
        self
    }

    pub fn query_item(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_items.push((name.into(), value.into()));
        self
    }

    pub fn query_items<K, V, I>(mut self, items: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query_items.extend(
            items
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    /// Marks query items as already percent-encoded so they are sent verbatim.
    pub fn query_percent_encoded(mut self, percent_encoded: bool) -> Self {
        self.query_percent_encoded = percent_encoded;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> NetResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn log_request(mut self, enabled: bool) -> Self {
        self.log_request = enabled;
        self
    }

    pub fn log_response(mut self, enabled: bool) -> Self {
        self.log_response = enabled;
        self
    }

    pub fn on_upload_progress<F>(mut self, context: CompletionContext, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.upload_progress = Some(Hook {
            callback: Arc::new(callback),
            context,
        });
        self
    }

    pub fn on_download_progress<F>(mut self, context: CompletionContext, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.download_progress = Some(Hook {
            callback: Arc::new(callback),
            context,
        });
        self
    }

    /// Observes every attempt's raw outcome before retry or decoding.
    pub fn on_raw_completion<F>(mut self, context: CompletionContext, callback: F) -> Self
    where
        F: Fn(Option<ResponseHead>, Option<TransportError>) + Send + Sync + 'static,
    {
        self.raw_completion = Some(Hook {
            callback: Arc::new(callback),
            context,
        });
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query_items
    }

    pub fn is_query_percent_encoded(&self) -> bool {
        self.query_percent_encoded
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_ref(&self) -> &RequestBody {
        &self.body
    }

    pub fn timeout_override(&self) -> Duration {
        self.timeout
    }

    pub fn max_attempts_override(&self) -> usize {
        self.max_attempts
    }

    pub fn credentials_ref(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn logs_request(&self) -> bool {
        self.log_request
    }

    pub fn logs_response(&self) -> bool {
        self.log_response
    }

    pub(crate) fn upload_progress_hook(&self) -> Option<&ProgressHook> {
        self.upload_progress.as_ref()
    }

    pub(crate) fn download_progress_hook(&self) -> Option<&ProgressHook> {
        self.download_progress.as_ref()
    }

    pub(crate) fn raw_completion_hook(&self) -> Option<&RawCompletionHook> {
        self.raw_completion.as_ref()
    }
}

impl std::fmt::Debug for NetworkRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NetworkRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query_items", &self.query_items)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}
