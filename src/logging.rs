//! Human-readable request and response summaries for the application-facing
//! logging hooks.

use std::fmt::Write as _;
use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, PROXY_AUTHORIZATION, SET_COOKIE};
use http::{HeaderMap, Method};

use crate::retry::AttemptState;
use crate::transport::TransportResult;
use crate::util::truncate_body;
use crate::wire::{WireBody, WireRequest};

pub type RequestLogger = Arc<dyn Fn(&str) + Send + Sync + 'static>;
pub type ResponseLogger = Arc<dyn Fn(&str, bool) + Send + Sync + 'static>;

pub(crate) fn format_request(wire: &WireRequest, attempt: AttemptState) -> String {
    let mut summary = String::from("------------- Request -------------\n");
    let _ = writeln!(
        summary,
        "Attempt {} of {}",
        attempt.attempt_number(),
        attempt.max_attempts()
    );
    let _ = writeln!(summary, "{} {}", wire.method(), wire.uri_text());
    write_headers(&mut summary, wire.headers());
    summary.push_str("Body:\n");
    let is_multipart = wire
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/"));
    match wire.body() {
        WireBody::Empty => summary.push_str("  <empty>\n"),
        WireBody::File { len, .. } => {
            let _ = writeln!(summary, "  <multipart body streamed from file, {len} bytes>");
        }
        WireBody::Buffered(body) if is_multipart => {
            let _ = writeln!(summary, "  <multipart body, {} bytes>", body.len());
        }
        WireBody::Buffered(body) => {
            let _ = writeln!(summary, "  {}", truncate_body(body));
        }
    }
    summary
}

pub(crate) fn format_response(
    method: &Method,
    uri_text: &str,
    result: &TransportResult,
    success: bool,
) -> String {
    let mut summary = String::from("------------- Response -------------\n");
    match result {
        Ok(response) => {
            let status = response.head.status;
            let _ = writeln!(
                summary,
                "{} {} {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                method,
                uri_text
            );
            let _ = writeln!(summary, "Success: {success}");
            write_headers(&mut summary, &response.head.headers);
            summary.push_str("Body:\n");
            if response.body.is_empty() {
                summary.push_str("  <empty>\n");
            } else {
                let _ = writeln!(summary, "  {}", truncate_body(&response.body));
            }
        }
        Err(error) => {
            let _ = writeln!(summary, "{method} {uri_text}");
            let _ = writeln!(summary, "Success: {success}");
            let _ = writeln!(summary, "Error: {error}");
        }
    }
    summary
}

fn write_headers(summary: &mut String, headers: &HeaderMap) {
    summary.push_str("Headers:\n");
    for (name, value) in headers {
        let redacted = value.is_sensitive()
            || [AUTHORIZATION, PROXY_AUTHORIZATION, COOKIE, SET_COOKIE].contains(name);
        let text = if redacted {
            "<redacted>"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        let _ = writeln!(summary, "  {name}: {text}");
    }
}
