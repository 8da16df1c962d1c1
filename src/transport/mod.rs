//! The boundary between the request engine and whatever moves bytes on the
//! network.
//!
//! A [`Transport`] receives one [`WireRequest`] per attempt together with a
//! cancellable [`TransportHandle`] and a [`TransportCompletion`]. It must call
//! [`TransportCompletion::complete`] once; a completion that is dropped
//! without being called reports an error on its own, so the engine always
//! observes exactly one outcome per submission.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::{TransportError, TransportErrorKind};
use crate::wire::WireRequest;

mod body;
mod hyper_client;

pub use self::hyper_client::{HyperTransport, TlsBackend};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "handle-{}", self.0)
    }
}

/// Cancellation handle for one unit of transport work.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    id: HandleId,
    token: CancellationToken,
}

impl TransportHandle {
    pub fn new() -> Self {
        Self {
            id: HandleId::next(),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for TransportHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub head: ResponseHead,
    pub body: Bytes,
}

pub type TransportResult = Result<TransportResponse, TransportError>;

type CompletionFn = Box<dyn FnOnce(TransportResult) + Send + 'static>;

/// One-shot completion for a submitted unit of work.
pub struct TransportCompletion {
    callback: Option<CompletionFn>,
}

impl TransportCompletion {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(TransportResult) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn complete(mut self, result: TransportResult) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for TransportCompletion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(TransportError::new(
                TransportErrorKind::Other,
                "transport dropped the request without completing it",
            )));
        }
    }
}

impl std::fmt::Debug for TransportCompletion {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportCompletion")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    /// `None` when the peer did not announce a length.
    pub total: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.completed as f64 / total as f64),
            None => None,
        }
    }
}

pub trait Transport: Send + Sync + 'static {
    fn submit(
        &self,
        request: WireRequest,
        handle: TransportHandle,
        completion: TransportCompletion,
    );
}
