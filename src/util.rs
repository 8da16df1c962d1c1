use std::sync::Mutex;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};

use crate::error::NetworkError;

const MAX_LOG_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Client defaults first, request headers win on a field-name collision.
pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for name in request_headers.keys() {
        merged.remove(name);
    }
    for (name, value) in request_headers {
        merged.append(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split(['?', '#']).next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Absolute http(s) paths are used verbatim, anything else is joined onto
/// `base_url` with exactly one separating slash.
pub(crate) fn resolve_uri(
    base_url: &str,
    path: &str,
    query_items: &[(String, String)],
    percent_encoded: bool,
) -> Result<(String, Uri), NetworkError> {
    let target = match path.parse::<Uri>() {
        Ok(uri) if uri.host().is_some() && uri.scheme().is_some() => {
            let scheme = uri.scheme_str().unwrap_or_default();
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
                path.to_owned()
            } else {
                return Err(NetworkError::InvalidUrl {
                    uri: path.to_owned(),
                });
            }
        }
        _ => join_base_path(base_url, path),
    };
    let uri_text = append_query_items(&target, query_items, percent_encoded);
    let uri = uri_text.parse::<Uri>().map_err(|_| NetworkError::InvalidUrl {
        uri: uri_text.clone(),
    })?;
    if uri.scheme().is_none() || uri.host().is_none() {
        return Err(NetworkError::InvalidUrl { uri: uri_text });
    }
    Ok((uri_text, uri))
}

pub(crate) fn validate_base_url(base_url: &str) -> Result<(), NetworkError> {
    let invalid = || NetworkError::InvalidUrl {
        uri: base_url.to_owned(),
    };
    if base_url.is_empty() || base_url.trim().len() != base_url.len() {
        return Err(invalid());
    }

    let parsed = url::Url::parse(base_url).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid());
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid());
    }
    Ok(())
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

/// Appends query items in order, keeping any query and fragment already on
/// `uri_text`. Pre-encoded items are copied through untouched.
pub(crate) fn append_query_items(
    uri_text: &str,
    query_items: &[(String, String)],
    percent_encoded: bool,
) -> String {
    if query_items.is_empty() {
        return uri_text.to_owned();
    }

    let (without_fragment, fragment) = match uri_text.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (uri_text, None),
    };
    let (base, existing_query) = match without_fragment.split_once('?') {
        Some((left, right)) => (left, Some(right)),
        None => (without_fragment, None),
    };

    let appended = if percent_encoded {
        query_items
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in query_items {
            serializer.append_pair(name, value);
        }
        serializer.finish()
    };

    let mut merged = match existing_query {
        Some(existing) if !existing.is_empty() => format!("{base}?{existing}&{appended}"),
        _ => format!("{base}?{appended}"),
    };
    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, NetworkError> {
    name.parse()
        .map_err(|source| NetworkError::InvalidHeaderName {
            name: name.to_owned(),
            source,
        })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, NetworkError> {
    value
        .parse()
        .map_err(|source| NetworkError::InvalidHeaderValue {
            name: name.to_owned(),
            source,
        })
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_LOG_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_LOG_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
