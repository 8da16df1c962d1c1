use std::marker::PhantomData;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::NetResult;
use crate::codec::decode_json;
use crate::error::NetworkError;
use crate::transport::ResponseHead;

/// Final outcome of a request: a typed result or an error, never both, plus
/// the response head when one was received.
///
/// A successful response without a body carries `Ok(None)` for shapes that
/// have no natural empty value.
#[derive(Debug)]
pub struct NetworkResponse<T> {
    head: Option<ResponseHead>,
    outcome: Result<Option<T>, NetworkError>,
}

impl<T> NetworkResponse<T> {
    pub(crate) fn success(head: Option<ResponseHead>, result: Option<T>) -> Self {
        Self {
            head,
            outcome: Ok(result),
        }
    }

    pub(crate) fn failure(head: Option<ResponseHead>, error: NetworkError) -> Self {
        Self {
            head,
            outcome: Err(error),
        }
    }

    pub fn result(&self) -> Option<&T> {
        self.outcome.as_ref().ok().and_then(Option::as_ref)
    }

    pub fn error(&self) -> Option<&NetworkError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(|head| head.status)
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.head.as_ref().map(|head| &head.headers)
    }

    pub fn into_result(self) -> Result<Option<T>, NetworkError> {
        self.outcome
    }

    pub fn into_parts(self) -> (Option<ResponseHead>, Result<Option<T>, NetworkError>) {
        (self.head, self.outcome)
    }
}

/// Converts a successful response body into a result shape.
pub trait ResponseDecoder: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Result for a 2xx response without a body.
    fn empty(&self) -> Option<Self::Output> {
        None
    }

    fn decode(&self, body: &Bytes) -> NetResult<Self::Output>;
}

/// Typed JSON, optionally read from a top-level member.
pub struct JsonDecoder<T> {
    result_key: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            result_key: None,
            _marker: PhantomData,
        }
    }

    pub fn with_result_key(result_key: impl Into<String>) -> Self {
        Self {
            result_key: Some(result_key.into()),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseDecoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn decode(&self, body: &Bytes) -> NetResult<T> {
        decode_json(body, self.result_key.as_deref())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DataDecoder;

impl ResponseDecoder for DataDecoder {
    type Output = Bytes;

    fn empty(&self) -> Option<Bytes> {
        Some(Bytes::new())
    }

    fn decode(&self, body: &Bytes) -> NetResult<Bytes> {
        Ok(body.clone())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextDecoder;

impl ResponseDecoder for TextDecoder {
    type Output = String;

    fn empty(&self) -> Option<String> {
        Some(String::new())
    }

    fn decode(&self, body: &Bytes) -> NetResult<String> {
        String::from_utf8(body.to_vec()).map_err(|error| NetworkError::Decoding {
            message: error.to_string(),
            body: body.clone(),
        })
    }
}

/// A JSON object. Valid JSON that is not an object yields an empty map.
#[derive(Clone, Copy, Debug, Default)]
pub struct DictionaryDecoder;

impl ResponseDecoder for DictionaryDecoder {
    type Output = Map<String, Value>;

    fn empty(&self) -> Option<Self::Output> {
        Some(Map::new())
    }

    fn decode(&self, body: &Bytes) -> NetResult<Self::Output> {
        match decode_json::<Value>(body, None)? {
            Value::Object(members) => Ok(members),
            _ => Ok(Map::new()),
        }
    }
}
