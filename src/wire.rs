//! Turns a [`NetworkRequest`] plus client defaults into a fully specified
//! [`WireRequest`] for one attempt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, Uri};
use tempfile::TempPath;

use crate::NetResult;
use crate::error::NetworkError;
use crate::multipart::MultipartBody;
use crate::request::{Credentials, NetworkRequest, ProgressHook, RequestBody, RequestId};
use crate::transport::Progress;
use crate::util::{merge_headers, parse_header_value, resolve_uri};

#[derive(Clone, Debug)]
pub struct ClientDefaults {
    pub base_url: String,
    pub default_headers: HeaderMap,
    pub default_timeout: Duration,
}

#[derive(Clone, Debug, Default)]
pub enum WireBody {
    #[default]
    Empty,
    Buffered(Bytes),
    /// Encoded body on disk; exactly `len` bytes are sent.
    File { path: PathBuf, len: u64 },
}

impl WireBody {
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Buffered(body) => body.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A request ready for a [`Transport`](crate::Transport).
pub struct WireRequest {
    request_id: RequestId,
    method: Method,
    uri: Uri,
    uri_text: String,
    headers: HeaderMap,
    body: WireBody,
    timeout: Duration,
    upload_progress: Option<ProgressHook>,
    download_progress: Option<ProgressHook>,
}

impl WireRequest {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn uri_text(&self) -> &str {
        &self.uri_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &WireBody {
        &self.body
    }

    pub fn take_body(&mut self) -> WireBody {
        std::mem::take(&mut self.body)
    }

    /// Per-attempt timeout the transport must enforce.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn wants_upload_progress(&self) -> bool {
        self.upload_progress.is_some()
    }

    pub fn wants_download_progress(&self) -> bool {
        self.download_progress.is_some()
    }

    pub fn report_upload_progress(&self, progress: Progress) {
        if let Some(hook) = &self.upload_progress {
            hook.emit(progress);
        }
    }

    pub fn report_download_progress(&self, progress: Progress) {
        if let Some(hook) = &self.download_progress {
            hook.emit(progress);
        }
    }

    pub(crate) fn upload_progress_hook(&self) -> Option<&ProgressHook> {
        self.upload_progress.as_ref()
    }

    pub(crate) fn download_progress_hook(&self) -> Option<&ProgressHook> {
        self.download_progress.as_ref()
    }
}

impl std::fmt::Debug for WireRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WireRequest")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri_text)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A wire request plus the temporary file backing its body, if any.
///
/// The temporary file belongs to the attempt's task and is deleted when the
/// task finalizes.
#[derive(Debug)]
pub(crate) struct PreparedRequest {
    pub(crate) wire: WireRequest,
    pub(crate) temp_file: Option<TempPath>,
}

pub(crate) fn prepare(
    request: &NetworkRequest,
    defaults: &ClientDefaults,
) -> NetResult<PreparedRequest> {
    let (uri_text, uri) = resolve_uri(
        &defaults.base_url,
        request.path(),
        request.query(),
        request.is_query_percent_encoded(),
    )?;

    let mut headers = merge_headers(&defaults.default_headers, request.headers());
    if let Some(credentials) = request.credentials_ref()
        && !headers.contains_key(AUTHORIZATION)
    {
        headers.insert(AUTHORIZATION, basic_authorization(credentials)?);
    }

    let timeout = if request.timeout_override().is_zero() {
        defaults.default_timeout
    } else {
        request.timeout_override()
    };

    let (body, temp_file) = match request.body_ref() {
        RequestBody::Empty => (WireBody::Empty, None),
        RequestBody::Raw(body) => (WireBody::Buffered(body.clone()), None),
        RequestBody::Json(body) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            (WireBody::Buffered(body.clone()), None)
        }
        RequestBody::Multipart(multipart) => materialize_multipart(multipart, &mut headers)?,
    };

    Ok(PreparedRequest {
        wire: WireRequest {
            request_id: request.id(),
            method: request.method().clone(),
            uri,
            uri_text,
            headers,
            body,
            timeout,
            upload_progress: request.upload_progress_hook().cloned(),
            download_progress: request.download_progress_hook().cloned(),
        },
        temp_file,
    })
}

fn materialize_multipart(
    multipart: &MultipartBody,
    headers: &mut HeaderMap,
) -> NetResult<(WireBody, Option<TempPath>)> {
    let content_type = multipart.content_type();
    headers.insert(
        CONTENT_TYPE,
        parse_header_value(CONTENT_TYPE.as_str(), &content_type)?,
    );

    let (body, temp_file) = if multipart.streams_to_file() {
        let encoded = multipart
            .encode_to_temp_file()
            .map_err(|source| NetworkError::BodyMaterialization { source })?;
        let path: &Path = &encoded.path;
        (
            WireBody::File {
                path: path.to_path_buf(),
                len: encoded.len,
            },
            Some(encoded.path),
        )
    } else {
        let encoded = multipart
            .encode_to_bytes()
            .map_err(|source| NetworkError::BodyMaterialization { source })?;
        (WireBody::Buffered(encoded), None)
    };

    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    Ok((body, temp_file))
}

fn basic_authorization(credentials: &Credentials) -> NetResult<HeaderValue> {
    let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
    let mut value = parse_header_value(AUTHORIZATION.as_str(), &format!("Basic {token}"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::HeaderMap;
    use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, USER_AGENT};

    use super::{ClientDefaults, WireBody, prepare};
    use crate::error::NetworkErrorCode;
    use crate::multipart::{MultipartBody, MultipartPart};
    use crate::request::{Credentials, NetworkRequest};

    fn defaults(base_url: &str) -> ClientDefaults {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static("netclient-test"));
        default_headers.insert("x-client", HeaderValue::from_static("default"));
        ClientDefaults {
            base_url: base_url.to_owned(),
            default_headers,
            default_timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn joins_base_and_path_with_one_slash() {
        for (base, path) in [
            ("https://api.example.com", "todos/1"),
            ("https://api.example.com/", "/todos/1"),
            ("https://api.example.com/", "todos/1"),
            ("https://api.example.com", "/todos/1"),
        ] {
            let prepared = prepare(&NetworkRequest::get(path), &defaults(base)).expect("prepare");
            assert_eq!(prepared.wire.uri_text(), "https://api.example.com/todos/1");
        }
    }

    #[test]
    fn absolute_path_is_used_verbatim() {
        let prepared = prepare(
            &NetworkRequest::get("http://other.example.net/ping"),
            &defaults("https://api.example.com/v1"),
        )
        .expect("prepare absolute");
        assert_eq!(prepared.wire.uri_text(), "http://other.example.net/ping");
    }

    #[test]
    fn request_headers_win_over_defaults() {
        let request = NetworkRequest::get("/a")
            .try_header("X-Client", "request")
            .expect("valid header");
        let prepared = prepare(&request, &defaults("https://api.example.com")).expect("prepare");
        let headers = prepared.wire.headers();
        assert_eq!(headers.get_all("x-client").iter().count(), 1);
        assert_eq!(headers["x-client"], "request");
        assert_eq!(headers[USER_AGENT], "netclient-test");
    }

    #[test]
    fn timeout_override_or_default() {
        let client_defaults = defaults("https://api.example.com");
        let inherited = prepare(&NetworkRequest::get("/a"), &client_defaults).expect("prepare");
        assert_eq!(inherited.wire.timeout(), Duration::from_secs(120));

        let overridden = prepare(
            &NetworkRequest::get("/a").timeout(Duration::from_secs(5)),
            &client_defaults,
        )
        .expect("prepare");
        assert_eq!(overridden.wire.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn json_body_sets_content_type() {
        let request = NetworkRequest::post("/todos")
            .json(&serde_json::json!({"title": "x"}))
            .expect("json body");
        let prepared = prepare(&request, &defaults("https://api.example.com")).expect("prepare");
        assert_eq!(prepared.wire.headers()[CONTENT_TYPE], "application/json");
        assert!(matches!(prepared.wire.body(), WireBody::Buffered(body) if &body[..] == br#"{"title":"x"}"#));
    }

    #[test]
    fn raw_body_passes_through() {
        let request = NetworkRequest::put("/blob").body(&b"raw"[..]);
        let prepared = prepare(&request, &defaults("https://api.example.com")).expect("prepare");
        assert!(prepared.wire.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(prepared.wire.body().len(), 3);
    }

    #[test]
    fn small_multipart_is_buffered_with_exact_length() {
        let body = MultipartBody::new().part(MultipartPart::string("hello", "greeting"));
        let expected_len = body.encoded_len();
        let boundary = body.boundary().to_owned();
        let request = NetworkRequest::post("/upload").multipart(body);

        let prepared = prepare(&request, &defaults("https://api.example.com")).expect("prepare");
        assert!(prepared.temp_file.is_none());
        assert_eq!(prepared.wire.body().len(), expected_len);
        assert_eq!(
            prepared.wire.headers()[CONTENT_LENGTH],
            expected_len.to_string().as_str()
        );
        assert_eq!(
            prepared.wire.headers()[CONTENT_TYPE],
            format!("multipart/form-data; boundary={boundary}").as_str()
        );
    }

    #[test]
    fn credentials_become_basic_auth_unless_explicit() {
        let request = NetworkRequest::get("/me").credentials(Credentials::new("user", "pass"));
        let prepared = prepare(&request, &defaults("https://api.example.com")).expect("prepare");
        assert_eq!(prepared.wire.headers()[AUTHORIZATION], "Basic dXNlcjpwYXNz");

        let explicit = NetworkRequest::get("/me")
            .credentials(Credentials::new("user", "pass"))
            .try_header("Authorization", "Bearer t")
            .expect("valid header");
        let prepared = prepare(&explicit, &defaults("https://api.example.com")).expect("prepare");
        assert_eq!(prepared.wire.headers()[AUTHORIZATION], "Bearer t");
    }

    #[test]
    fn query_items_are_encoded_in_order() {
        let request = NetworkRequest::get("/search")
            .query_item("q", "a b")
            .query_item("page", "2");
        let prepared = prepare(&request, &defaults("https://api.example.com")).expect("prepare");
        assert_eq!(
            prepared.wire.uri_text(),
            "https://api.example.com/search?q=a+b&page=2"
        );

        let encoded = NetworkRequest::get("/search")
            .query_item("q", "a%20b")
            .query_percent_encoded(true);
        let prepared = prepare(&encoded, &defaults("https://api.example.com")).expect("prepare");
        assert_eq!(
            prepared.wire.uri_text(),
            "https://api.example.com/search?q=a%20b"
        );
    }

    #[test]
    fn unparseable_address_is_invalid_request() {
        let error = prepare(&NetworkRequest::get("/a b"), &defaults("https://api.example.com"))
            .expect_err("space in path");
        assert_eq!(error.code(), NetworkErrorCode::InvalidRequest);

        let error = prepare(&NetworkRequest::get("todos"), &defaults(""))
            .expect_err("no scheme or host");
        assert_eq!(error.code(), NetworkErrorCode::InvalidRequest);
    }
}
