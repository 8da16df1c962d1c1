//! `netclient` is an HTTP client that runs every call through one pipeline:
//! a request descriptor is turned into a wire request, tracked as a
//! cancellable task, retried on transient failures and resolved into exactly
//! one typed response.
//!
//! # Quick Start
//!
//! ```no_run
//! use netclient::prelude::{NetworkClient, NetworkRequest, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Todo {
//!     id: u64,
//!     title: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NetworkClient::builder("https://jsonplaceholder.typicode.com")
//!         .retry_policy(RetryPolicy::disabled().max_attempts(3))
//!         .try_build()?;
//!
//!     let todo = client
//!         .send_json::<Todo>(NetworkRequest::get("/todos/1"))
//!         .await
//!         .into_result()?;
//!
//!     println!("todo={todo:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Calling Conventions
//!
//! - [`NetworkClient::perform`] takes a completion handler that runs once on
//!   the client's [`CompletionContext`].
//! - [`NetworkClient::send`] awaits the same pipeline; dropping the future
//!   cancels the request.

#[cfg(all(
    not(feature = "tls-rustls-ring"),
    not(feature = "tls-rustls-aws-lc-rs")
))]
compile_error!(
    "netclient requires one TLS backend feature: enable `tls-rustls-ring` or `tls-rustls-aws-lc-rs`"
);

mod client;
mod codec;
mod context;
mod error;
mod logging;
mod metrics;
mod multipart;
mod registry;
mod request;
mod resolver;
mod response;
mod retry;
mod task;
mod transport;
mod util;
mod wire;

pub use crate::client::{DEFAULT_TIMEOUT, NetworkClient, NetworkClientBuilder};
pub use crate::codec::{decode_json, encode_json};
pub use crate::context::{CompletionContext, Job};
pub use crate::error::{NetworkError, NetworkErrorCode, TransportError, TransportErrorKind};
pub use crate::logging::{RequestLogger, ResponseLogger};
pub use crate::metrics::NetworkMetricsSnapshot;
pub use crate::multipart::{
    EncodedFile, MULTIPART_FILE_THRESHOLD, MimeType, MultipartBody, MultipartPart, PartSource,
};
pub use crate::request::{Credentials, NetworkRequest, RequestBody, RequestId};
pub use crate::resolver::{
    FLASH_MESSAGES_HEADER, FlashMessagesHeaderCheck, HeaderErrorCheck, NoHeaderErrorCheck,
};
pub use crate::response::{
    DataDecoder, DictionaryDecoder, JsonDecoder, NetworkResponse, ResponseDecoder, TextDecoder,
};
pub use crate::retry::{AttemptState, RetryPolicy};
pub use crate::task::NetworkTask;
pub use crate::transport::{
    HandleId, HyperTransport, Progress, ResponseHead, TlsBackend, Transport, TransportCompletion,
    TransportHandle, TransportResponse, TransportResult,
};
pub use crate::wire::{WireBody, WireRequest};

pub type NetResult<T> = std::result::Result<T, NetworkError>;

pub mod prelude {
    pub use crate::{
        CompletionContext, Credentials, DataDecoder, DictionaryDecoder, JsonDecoder, MimeType,
        MultipartBody, MultipartPart, NetResult, NetworkClient, NetworkError, NetworkErrorCode,
        NetworkRequest, NetworkResponse, NetworkTask, RetryPolicy, TextDecoder,
    };
}

#[cfg(test)]
mod tests;
