//! Classification of one attempt's transport outcome and mapping of the
//! final outcome into a [`NetworkResponse`].

use std::collections::HashMap;

use bytes::Bytes;
use http::{Method, StatusCode};

use crate::error::NetworkError;
use crate::response::{NetworkResponse, ResponseDecoder};
use crate::retry::RetryPolicy;
use crate::transport::{ResponseHead, TransportResponse, TransportResult};

pub const FLASH_MESSAGES_HEADER: &str = "x-flash-messages";

/// Detects an error signalled inside a 2xx response, typically through a
/// vendor-specific header. Returning `Some` turns the response into a
/// [`NetworkError::FailedResponse`].
pub trait HeaderErrorCheck: Send + Sync + 'static {
    fn embedded_error(&self, head: &ResponseHead, body: &Bytes) -> Option<String>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoHeaderErrorCheck;

impl HeaderErrorCheck for NoHeaderErrorCheck {
    fn embedded_error(&self, _head: &ResponseHead, _body: &Bytes) -> Option<String> {
        None
    }
}

/// Reads `x-flash-messages`, a JSON object of message lists keyed by level
/// whose quoting arrives HTML-escaped. An `error` key marks the response as
/// failed.
///
/// Quotes are unescaped from the JSON-escaped entity `\u0026quot;` and also
/// from a bare `&quot;`. Accepting the bare form is deliberate.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlashMessagesHeaderCheck;

impl HeaderErrorCheck for FlashMessagesHeaderCheck {
    fn embedded_error(&self, head: &ResponseHead, _body: &Bytes) -> Option<String> {
        let raw = head.headers.get(FLASH_MESSAGES_HEADER)?.to_str().ok()?;
        let unescaped = raw
            .replace("\\u0026quot;", "\"")
            .replace("&quot;", "\"")
            .replace("\"[", "[")
            .replace("]\"", "]");
        let messages: HashMap<String, Vec<String>> = serde_json::from_str(&unescaped).ok()?;
        let errors = messages.get("error")?;
        Some(errors.join("; "))
    }
}

/// Result of one attempt, before the retry decision.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Success(TransportResponse),
    Failure {
        head: Option<ResponseHead>,
        error: NetworkError,
        transient: bool,
    },
}

impl AttemptOutcome {
    pub(crate) fn is_transient_failure(&self) -> bool {
        matches!(self, Self::Failure { transient: true, .. })
    }

    #[cfg(test)]
    pub(crate) fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

pub(crate) fn classify(
    result: TransportResult,
    method: &Method,
    uri: &str,
    retry_policy: &RetryPolicy,
    header_check: &dyn HeaderErrorCheck,
) -> AttemptOutcome {
    let response = match result {
        Ok(response) => response,
        Err(error) => {
            let transient = error.kind.is_transient();
            return AttemptOutcome::Failure {
                head: None,
                error: NetworkError::from_transport(error, method, uri),
                transient,
            };
        }
    };

    let status = response.head.status;
    if status.is_success() {
        let Some(message) = header_check.embedded_error(&response.head, &response.body) else {
            return AttemptOutcome::Success(response);
        };
        tracing::debug!(
            method = %method,
            status = status.as_u16(),
            message = %message,
            "2xx response carried an embedded error"
        );
        return failed_response(response, method, uri, false);
    }

    if status == StatusCode::UNAUTHORIZED {
        let TransportResponse { head, body } = response;
        return AttemptOutcome::Failure {
            error: NetworkError::Unauthorized {
                method: method.clone(),
                uri: uri.to_owned(),
                headers: Box::new(head.headers.clone()),
                body,
            },
            head: Some(head),
            transient: false,
        };
    }

    let transient = retry_policy.is_retryable_status(status);
    failed_response(response, method, uri, transient)
}

fn failed_response(
    response: TransportResponse,
    method: &Method,
    uri: &str,
    transient: bool,
) -> AttemptOutcome {
    let TransportResponse { head, body } = response;
    AttemptOutcome::Failure {
        error: NetworkError::FailedResponse {
            status: head.status.as_u16(),
            method: method.clone(),
            uri: uri.to_owned(),
            headers: Box::new(head.headers.clone()),
            body,
        },
        head: Some(head),
        transient,
    }
}

/// Maps a terminal attempt outcome into the caller-facing response.
pub(crate) fn resolve<D>(outcome: AttemptOutcome, decoder: &D) -> NetworkResponse<D::Output>
where
    D: ResponseDecoder + ?Sized,
{
    match outcome {
        AttemptOutcome::Failure { head, error, .. } => NetworkResponse::failure(head, error),
        AttemptOutcome::Success(TransportResponse { head, body }) => {
            if body.is_empty() || head.status == StatusCode::NO_CONTENT {
                return NetworkResponse::success(Some(head), decoder.empty());
            }
            match decoder.decode(&body) {
                Ok(value) => NetworkResponse::success(Some(head), Some(value)),
                Err(error) => NetworkResponse::failure(Some(head), error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, Method, StatusCode};

    use super::{
        AttemptOutcome, FlashMessagesHeaderCheck, HeaderErrorCheck, NoHeaderErrorCheck, classify,
        resolve,
    };
    use crate::error::{NetworkErrorCode, TransportError, TransportErrorKind};
    use crate::response::{DataDecoder, DictionaryDecoder, JsonDecoder};
    use crate::retry::RetryPolicy;
    use crate::transport::{ResponseHead, TransportResponse};

    const URI: &str = "https://api.example.com/todos/1";

    fn response(status: u16, body: &'static [u8]) -> TransportResponse {
        response_with_headers(status, HeaderMap::new(), body)
    }

    fn response_with_headers(
        status: u16,
        headers: HeaderMap,
        body: &'static [u8],
    ) -> TransportResponse {
        TransportResponse {
            head: ResponseHead {
                status: StatusCode::from_u16(status).expect("valid status"),
                headers,
                url: URI.to_owned(),
            },
            body: Bytes::from_static(body),
        }
    }

    fn classify_ok(response: TransportResponse) -> AttemptOutcome {
        classify(
            Ok(response),
            &Method::GET,
            URI,
            &RetryPolicy::default(),
            &FlashMessagesHeaderCheck,
        )
    }

    #[test]
    fn transient_transport_errors_are_retryable() {
        for kind in [
            TransportErrorKind::Timeout,
            TransportErrorKind::Dns,
            TransportErrorKind::Connect,
            TransportErrorKind::Tls,
        ] {
            let outcome = classify(
                Err(TransportError::new(kind, "boom")),
                &Method::GET,
                URI,
                &RetryPolicy::default(),
                &NoHeaderErrorCheck,
            );
            assert!(outcome.is_transient_failure(), "{kind} should be transient");
        }
    }

    #[test]
    fn cancellation_is_never_retryable() {
        let outcome = classify(
            Err(TransportError::cancelled()),
            &Method::GET,
            URI,
            &RetryPolicy::default(),
            &NoHeaderErrorCheck,
        );
        assert!(!outcome.is_transient_failure());
        let resolved = resolve(outcome, &DataDecoder);
        assert_eq!(
            resolved.error().map(|error| error.code()),
            Some(NetworkErrorCode::Cancelled)
        );
    }

    #[test]
    fn status_mapping() {
        let unavailable = classify_ok(response(503, b"busy"));
        assert!(unavailable.is_transient_failure());

        let unauthorized = resolve(classify_ok(response(401, b"denied")), &DataDecoder);
        let error = unauthorized.error().expect("401 is an error");
        assert_eq!(error.code(), NetworkErrorCode::Unauthorized);
        assert_eq!(error.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(error.body().map(|body| &body[..]), Some(&b"denied"[..]));

        let not_found = classify_ok(response(404, b"missing"));
        assert!(!not_found.is_transient_failure());
        let not_found = resolve(not_found, &DataDecoder);
        assert_eq!(
            not_found.error().map(|error| error.code()),
            Some(NetworkErrorCode::FailedResponse)
        );
        assert_eq!(not_found.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn no_content_is_empty_success() {
        let resolved = resolve(classify_ok(response(204, b"")), &DictionaryDecoder);
        assert!(resolved.is_success());
        assert!(resolved.result().is_some_and(|map| map.is_empty()));

        let typed = resolve(
            classify_ok(response(204, b"")),
            &JsonDecoder::<serde_json::Value>::new(),
        );
        assert!(typed.is_success());
        assert!(typed.result().is_none());
    }

    #[test]
    fn undecodable_body_is_decoding_failure() {
        let resolved = resolve(
            classify_ok(response(200, b"not json")),
            &JsonDecoder::<serde_json::Value>::new(),
        );
        let error = resolved.error().expect("decoding failure");
        assert_eq!(error.code(), NetworkErrorCode::DecodingFailure);
        assert_eq!(error.body().map(|body| &body[..]), Some(&b"not json"[..]));
    }

    #[test]
    fn flash_error_header_turns_success_into_failure() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-flash-messages",
            HeaderValue::from_static(
                r#"{&quot;error&quot;:&quot;[&quot;Quota exceeded&quot;]&quot;}"#,
            ),
        );
        let head = ResponseHead {
            status: StatusCode::OK,
            headers: headers.clone(),
            url: URI.to_owned(),
        };
        assert_eq!(
            FlashMessagesHeaderCheck.embedded_error(&head, &Bytes::new()),
            Some("Quota exceeded".to_owned())
        );

        let outcome = classify_ok(response_with_headers(200, headers.clone(), b"{}"));
        assert!(!outcome.is_success());
        assert!(!outcome.is_transient_failure());

        let ignored = classify(
            Ok(response_with_headers(200, headers, b"{}")),
            &Method::GET,
            URI,
            &RetryPolicy::default(),
            &NoHeaderErrorCheck,
        );
        assert!(ignored.is_success());
    }

    #[test]
    fn flash_notice_header_is_not_an_error() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-flash-messages",
            HeaderValue::from_static(r#"{"notice":["Saved"]}"#),
        );
        assert!(classify_ok(response_with_headers(200, headers, b"{}")).is_success());
    }

    #[test]
    fn flash_error_header_accepts_json_escaped_entities() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-flash-messages",
            HeaderValue::from_static(
                r#"{\u0026quot;error\u0026quot;:\u0026quot;[\u0026quot;Bad token\u0026quot;,\u0026quot;Try again\u0026quot;]\u0026quot;}"#,
            ),
        );
        let head = ResponseHead {
            status: StatusCode::OK,
            headers,
            url: URI.to_owned(),
        };
        assert_eq!(
            FlashMessagesHeaderCheck.embedded_error(&head, &Bytes::new()),
            Some("Bad token; Try again".to_owned())
        );
    }
}
