use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::NetResult;
use crate::error::NetworkError;

pub fn encode_json<T>(value: &T) -> NetResult<Bytes>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| NetworkError::Encoding { source })
}

/// Decodes `body` as `T`, optionally selecting the top-level member
/// `result_key` first.
///
/// A selected member that does not deserialize as `T` but is itself a JSON
/// string is tried once more as embedded JSON text.
pub fn decode_json<T>(body: &Bytes, result_key: Option<&str>) -> NetResult<T>
where
    T: DeserializeOwned,
{
    let Some(result_key) = result_key else {
        return serde_json::from_slice(body).map_err(|error| decoding_error(error, body));
    };

    let document: Value =
        serde_json::from_slice(body).map_err(|error| decoding_error(error, body))?;
    let Value::Object(mut members) = document else {
        return Err(NetworkError::Decoding {
            message: format!("expected a JSON object containing `{result_key}`"),
            body: body.clone(),
        });
    };
    let Some(member) = members.remove(result_key) else {
        return Err(NetworkError::Decoding {
            message: format!("missing result key `{result_key}`"),
            body: body.clone(),
        });
    };

    match serde_json::from_value::<T>(member.clone()) {
        Ok(value) => Ok(value),
        Err(error) => match member {
            Value::String(text) => {
                serde_json::from_str(&text).map_err(|_| decoding_error(error, body))
            }
            _ => Err(decoding_error(error, body)),
        },
    }
}

fn decoding_error(error: serde_json::Error, body: &Bytes) -> NetworkError {
    NetworkError::Decoding {
        message: error.to_string(),
        body: body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    use super::{decode_json, encode_json};
    use crate::error::NetworkErrorCode;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Todo {
        #[serde(rename = "userId")]
        user_id: u64,
        id: u64,
        title: String,
        completed: bool,
    }

    #[test]
    fn encode_then_decode_yields_equal_value() {
        let todo = Todo {
            user_id: 1,
            id: 1,
            title: "x".to_owned(),
            completed: false,
        };
        let encoded = encode_json(&todo).expect("encode todo");
        let decoded: Todo = decode_json(&encoded, None).expect("decode todo");
        assert_eq!(decoded, todo);
    }

    #[test]
    fn result_key_selects_nested_member() {
        let body = Bytes::from_static(br#"{"data":{"userId":2,"id":5,"title":"y","completed":true},"meta":{}}"#);
        let todo: Todo = decode_json(&body, Some("data")).expect("decode nested member");
        assert_eq!(todo.id, 5);
        assert!(todo.completed);
    }

    #[test]
    fn result_key_extracts_scalar_member() {
        let body = Bytes::from_static(br#"{"token":"abc","ttl":30}"#);
        let token: String = decode_json(&body, Some("token")).expect("decode scalar");
        let ttl: u32 = decode_json(&body, Some("ttl")).expect("decode number");
        assert_eq!(token, "abc");
        assert_eq!(ttl, 30);
    }

    #[test]
    fn result_key_falls_back_to_embedded_json_text() {
        let body = Bytes::from_static(br#"{"payload":"[1,2,3]"}"#);
        let values: Vec<u8> = decode_json(&body, Some("payload")).expect("decode embedded json");
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn missing_result_key_is_decoding_failure() {
        let body = Bytes::from_static(br#"{"other":1}"#);
        let error = decode_json::<u32>(&body, Some("data")).expect_err("missing key");
        assert_eq!(error.code(), NetworkErrorCode::DecodingFailure);
        assert_eq!(error.body(), Some(&body));
    }

    #[test]
    fn malformed_body_keeps_raw_bytes() {
        let body = Bytes::from_static(b"<html>oops</html>");
        let error = decode_json::<Todo>(&body, None).expect_err("not json");
        assert_eq!(error.code(), NetworkErrorCode::DecodingFailure);
        assert_eq!(error.body(), Some(&body));
    }
}
