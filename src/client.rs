use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{Span, debug, info_span, warn};

use crate::NetResult;
use crate::context::CompletionContext;
use crate::error::NetworkError;
use crate::logging::{RequestLogger, ResponseLogger, format_request, format_response};
use crate::metrics::{InFlightGuard, NetworkMetrics, NetworkMetricsSnapshot};
use crate::registry::TaskRegistry;
use crate::request::{NetworkRequest, RequestId};
use crate::resolver::{self, FlashMessagesHeaderCheck, HeaderErrorCheck};
use crate::response::{
    DataDecoder, DictionaryDecoder, JsonDecoder, NetworkResponse, ResponseDecoder, TextDecoder,
};
use crate::retry::{AttemptState, RetryPolicy};
use crate::task::NetworkTask;
use crate::transport::{
    HandleId, HyperTransport, TlsBackend, Transport, TransportCompletion, TransportHandle,
    TransportResult,
};
use crate::util::{
    lock_unpoisoned, parse_header_name, parse_header_value, redact_uri_for_logs,
    validate_base_url,
};
use crate::wire::{self, ClientDefaults, PreparedRequest};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct NetworkClientBuilder {
    base_url: String,
    default_headers: HeaderMap,
    timeout: Duration,
    retry_policy: RetryPolicy,
    completion_context: Option<CompletionContext>,
    runtime: Option<Handle>,
    transport: Option<Arc<dyn Transport>>,
    tls_backend: TlsBackend,
    request_logger: Option<RequestLogger>,
    response_logger: Option<ResponseLogger>,
    log_requests: bool,
    log_responses: bool,
    header_error_check: Arc<dyn HeaderErrorCheck>,
    metrics_enabled: bool,
}

impl NetworkClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, default_user_agent());
        Self {
            base_url: base_url.into(),
            default_headers,
            timeout: DEFAULT_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            completion_context: None,
            runtime: None,
            transport: None,
            tls_backend: TlsBackend::default(),
            request_logger: None,
            response_logger: None,
            log_requests: true,
            log_responses: true,
            header_error_check: Arc::new(FlashMessagesHeaderCheck),
            metrics_enabled: false,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> NetResult<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn remove_default_header(mut self, name: &str) -> Self {
        self.default_headers.remove(name);
        self
    }

    pub fn user_agent(self, user_agent: HeaderValue) -> Self {
        self.default_header(USER_AGENT, user_agent)
    }

    /// Where completion handlers run unless a call names its own context.
    pub fn completion_context(mut self, completion_context: CompletionContext) -> Self {
        self.completion_context = Some(completion_context);
        self
    }

    /// Runtime for the default transport and for delayed retries.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn transport<T>(self, transport: T) -> Self
    where
        T: Transport,
    {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn tls_backend(mut self, tls_backend: TlsBackend) -> Self {
        self.tls_backend = tls_backend;
        self
    }

    pub fn request_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.request_logger = Some(Arc::new(logger));
        self
    }

    pub fn response_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.response_logger = Some(Arc::new(logger));
        self
    }

    pub fn log_requests(mut self, enabled: bool) -> Self {
        self.log_requests = enabled;
        self
    }

    pub fn log_responses(mut self, enabled: bool) -> Self {
        self.log_responses = enabled;
        self
    }

    pub fn header_error_check<C>(self, check: C) -> Self
    where
        C: HeaderErrorCheck,
    {
        self.header_error_check_arc(Arc::new(check))
    }

    pub fn header_error_check_arc(mut self, check: Arc<dyn HeaderErrorCheck>) -> Self {
        self.header_error_check = check;
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn try_build(self) -> NetResult<NetworkClient> {
        validate_base_url(&self.base_url)?;

        let runtime = self.runtime.or_else(|| Handle::try_current().ok());
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let runtime = runtime.clone().ok_or(NetworkError::RuntimeUnavailable)?;
                Arc::new(HyperTransport::with_runtime(runtime, self.tls_backend)?)
            }
        };
        let completion_context = match (self.completion_context, &runtime) {
            (Some(context), _) => context,
            (None, Some(runtime)) => CompletionContext::Runtime(runtime.clone()),
            (None, None) => CompletionContext::Inline,
        };
        let metrics = if self.metrics_enabled {
            NetworkMetrics::enabled()
        } else {
            NetworkMetrics::disabled()
        };

        Ok(NetworkClient {
            inner: Arc::new(ClientInner {
                defaults: ClientDefaults {
                    base_url: self.base_url,
                    default_headers: self.default_headers,
                    default_timeout: self.timeout,
                },
                retry_policy: self.retry_policy,
                transport,
                registry: TaskRegistry::new(),
                runtime,
                completion_context,
                request_logger: self.request_logger.filter(|_| self.log_requests),
                response_logger: self.response_logger.filter(|_| self.log_responses),
                header_error_check: self.header_error_check,
                metrics,
            }),
        })
    }

    #[track_caller]
    pub fn build(self) -> NetworkClient {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build netclient network client: {error}; use try_build() to handle configuration errors")
        })
    }
}

fn default_user_agent() -> HeaderValue {
    HeaderValue::from_static(concat!("netclient/", env!("CARGO_PKG_VERSION")))
}

struct ClientInner {
    defaults: ClientDefaults,
    retry_policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    registry: TaskRegistry,
    runtime: Option<Handle>,
    completion_context: CompletionContext,
    request_logger: Option<RequestLogger>,
    response_logger: Option<ResponseLogger>,
    header_error_check: Arc<dyn HeaderErrorCheck>,
    metrics: NetworkMetrics,
}

/// Issues [`NetworkRequest`]s through one retrying pipeline, with a callback
/// front end ([`perform`](Self::perform)) and an async one
/// ([`send`](Self::send)).
#[derive(Clone)]
pub struct NetworkClient {
    inner: Arc<ClientInner>,
}

impl NetworkClient {
    pub fn builder(base_url: impl Into<String>) -> NetworkClientBuilder {
        NetworkClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.defaults.base_url
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.inner.defaults.default_headers
    }

    pub fn timeout(&self) -> Duration {
        self.inner.defaults.default_timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    /// Submits `request` and calls `completion` exactly once, on the client's
    /// completion context, after retries are exhausted.
    pub fn perform<D, F>(&self, request: NetworkRequest, decoder: D, completion: F) -> NetworkTask
    where
        D: ResponseDecoder,
        F: FnOnce(NetworkResponse<D::Output>) + Send + 'static,
    {
        let context = self.inner.completion_context.clone();
        self.perform_on(request, decoder, context, completion)
    }

    pub fn perform_on<D, F>(
        &self,
        request: NetworkRequest,
        decoder: D,
        context: CompletionContext,
        completion: F,
    ) -> NetworkTask
    where
        D: ResponseDecoder,
        F: FnOnce(NetworkResponse<D::Output>) + Send + 'static,
    {
        let max_attempts = match request.max_attempts_override() {
            0 => self.inner.retry_policy.configured_max_attempts(),
            max_attempts => max_attempts,
        };
        let attempt = AttemptState::new(max_attempts);
        let task = NetworkTask::new(
            request.id(),
            request.method().clone(),
            request.path().to_owned(),
            attempt.max_attempts(),
        );
        let in_flight = self.inner.metrics.record_request_started();
        let pipeline = Arc::new(Pipeline {
            client: Arc::clone(&self.inner),
            request,
            decoder,
            task: task.clone(),
            context,
            delivery: Mutex::new(Some(Box::new(completion))),
            in_flight: Mutex::new(Some(in_flight)),
            started_at: Instant::now(),
        });
        self.inner.registry.insert(task.clone());
        pipeline.submit_attempt(attempt);
        task
    }

    pub fn perform_json<T, F>(&self, request: NetworkRequest, completion: F) -> NetworkTask
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(NetworkResponse<T>) + Send + 'static,
    {
        self.perform(request, JsonDecoder::<T>::new(), completion)
    }

    pub fn perform_data<F>(&self, request: NetworkRequest, completion: F) -> NetworkTask
    where
        F: FnOnce(NetworkResponse<bytes::Bytes>) + Send + 'static,
    {
        self.perform(request, DataDecoder, completion)
    }

    pub fn perform_text<F>(&self, request: NetworkRequest, completion: F) -> NetworkTask
    where
        F: FnOnce(NetworkResponse<String>) + Send + 'static,
    {
        self.perform(request, TextDecoder, completion)
    }

    pub fn perform_dictionary<F>(&self, request: NetworkRequest, completion: F) -> NetworkTask
    where
        F: FnOnce(NetworkResponse<Map<String, Value>>) + Send + 'static,
    {
        self.perform(request, DictionaryDecoder, completion)
    }

    /// Async front end over [`perform_on`](Self::perform_on). Dropping the
    /// returned future cancels the request.
    pub async fn send<D>(&self, request: NetworkRequest, decoder: D) -> NetworkResponse<D::Output>
    where
        D: ResponseDecoder,
    {
        let (sender, receiver) = oneshot::channel();
        let task = self.perform_on(request, decoder, CompletionContext::Inline, move |response| {
            let _ = sender.send(response);
        });
        let mut cancel_on_drop = CancelOnDrop { task: Some(task) };
        let received = receiver.await;
        cancel_on_drop.disarm();
        match received {
            Ok(response) => response,
            Err(_) => NetworkResponse::failure(None, NetworkError::Cancelled),
        }
    }

    pub async fn send_json<T>(&self, request: NetworkRequest) -> NetworkResponse<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.send(request, JsonDecoder::<T>::new()).await
    }

    pub async fn send_data(&self, request: NetworkRequest) -> NetworkResponse<bytes::Bytes> {
        self.send(request, DataDecoder).await
    }

    pub async fn send_text(&self, request: NetworkRequest) -> NetworkResponse<String> {
        self.send(request, TextDecoder).await
    }

    pub async fn send_dictionary(
        &self,
        request: NetworkRequest,
    ) -> NetworkResponse<Map<String, Value>> {
        self.send(request, DictionaryDecoder).await
    }

    pub fn task(&self, id: RequestId) -> Option<NetworkTask> {
        self.inner.registry.find_by_id(id)
    }

    pub fn task_for_handle(&self, handle_id: HandleId) -> Option<NetworkTask> {
        self.inner.registry.find_by_handle(handle_id)
    }

    pub fn in_flight(&self) -> Vec<NetworkTask> {
        self.inner.registry.snapshot()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns `false` when no task with this identity is in flight.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.inner.registry.find_by_id(id) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight task and empties the registry. Each pending
    /// caller still receives one cancelled response.
    pub fn cancel_all_requests(&self) {
        let tasks = self.inner.registry.drain();
        debug!(count = tasks.len(), "cancelling all in-flight requests");
        for task in tasks {
            task.cancel();
        }
    }

    pub fn metrics_snapshot(&self) -> NetworkMetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NetworkClient")
            .field("base_url", &self.inner.defaults.base_url)
            .field("timeout", &self.inner.defaults.default_timeout)
            .field("retry_policy", &self.inner.retry_policy)
            .field("in_flight", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

struct CancelOnDrop {
    task: Option<NetworkTask>,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.task = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(request_id = %task.id(), "request future dropped; cancelling");
            task.cancel();
        }
    }
}

type Delivery<T> = Box<dyn FnOnce(NetworkResponse<T>) + Send + 'static>;

/// State shared by every attempt of one request.
struct Pipeline<D: ResponseDecoder> {
    client: Arc<ClientInner>,
    request: NetworkRequest,
    decoder: D,
    task: NetworkTask,
    context: CompletionContext,
    delivery: Mutex<Option<Delivery<D::Output>>>,
    in_flight: Mutex<Option<InFlightGuard>>,
    started_at: Instant,
}

impl<D: ResponseDecoder> Pipeline<D> {
    fn attempt_span(&self, attempt: AttemptState) -> Span {
        info_span!(
            "netclient.request",
            request_id = %self.request.id(),
            method = %self.request.method(),
            uri = %redact_uri_for_logs(self.request.path()),
            attempt = attempt.attempt_number(),
            max_attempts = attempt.max_attempts()
        )
    }

    fn submit_attempt(self: &Arc<Self>, attempt: AttemptState) {
        let span = self.attempt_span(attempt);
        let _enter = span.enter();

        if self.task.is_cancelled() {
            debug!("request cancelled before submission");
            self.finalize(NetworkResponse::failure(None, NetworkError::Cancelled));
            return;
        }

        let PreparedRequest { wire, temp_file } =
            match wire::prepare(&self.request, &self.client.defaults) {
                Ok(prepared) => prepared,
                Err(error) => {
                    debug!(error = %error, "request could not be prepared");
                    self.finalize(NetworkResponse::failure(None, error));
                    return;
                }
            };

        let handle = TransportHandle::new();
        if !self
            .task
            .begin_attempt(handle.clone(), temp_file, attempt.remaining())
        {
            debug!("request cancelled before submission");
            self.finalize(NetworkResponse::failure(None, NetworkError::Cancelled));
            return;
        }

        if self.request.logs_request()
            && let Some(logger) = &self.client.request_logger
        {
            logger(&format_request(&wire, attempt));
        }

        let uri_text = wire.uri_text().to_owned();
        debug!(
            uri = %redact_uri_for_logs(&uri_text),
            handle = %handle.id(),
            "submitting request"
        );
        let pipeline = Arc::clone(self);
        let completion = TransportCompletion::new(move |result| {
            pipeline.on_attempt_complete(attempt, &uri_text, result);
        });
        self.client.transport.submit(wire, handle, completion);
    }

    fn on_attempt_complete(
        self: &Arc<Self>,
        attempt: AttemptState,
        uri_text: &str,
        result: TransportResult,
    ) {
        let span = self.attempt_span(attempt);
        let _enter = span.enter();

        self.client.metrics.record_attempt(&result);
        if let Some(hook) = self.request.raw_completion_hook() {
            let head = result.as_ref().ok().map(|response| response.head.clone());
            hook.emit(head, result.as_ref().err().cloned());
        }

        let response_logger = self
            .client
            .response_logger
            .as_ref()
            .filter(|_| self.request.logs_response());
        let logged = response_logger.map(|_| result.clone());
        let log_response = |success: bool| {
            if let (Some(logger), Some(raw)) = (response_logger, logged.as_ref()) {
                logger(
                    &format_response(self.request.method(), uri_text, raw, success),
                    success,
                );
            }
        };

        let outcome = resolver::classify(
            result,
            self.request.method(),
            uri_text,
            &self.client.retry_policy,
            self.client.header_error_check.as_ref(),
        );

        if self.task.is_cancelled() {
            log_response(false);
            debug!("request cancelled");
            let head = match outcome {
                resolver::AttemptOutcome::Success(response) => Some(response.head),
                resolver::AttemptOutcome::Failure { head, .. } => head,
            };
            self.finalize(NetworkResponse::failure(head, NetworkError::Cancelled));
            return;
        }

        if outcome.is_transient_failure()
            && let Some(next) = attempt.next()
        {
            let delay = self
                .client
                .retry_policy
                .backoff_for_retry(attempt.attempt_number());
            if let resolver::AttemptOutcome::Failure { error, .. } = &outcome {
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    remaining_attempts = next.remaining(),
                    error = %error,
                    "retrying request after transient failure"
                );
            }
            log_response(false);
            self.client.metrics.record_retry();
            self.schedule_retry(next, delay);
            return;
        }

        // Logged after decoding so the flag matches what the caller receives.
        let response = resolver::resolve(outcome, &self.decoder);
        log_response(response.is_success());
        self.finalize(response);
    }

    fn schedule_retry(self: &Arc<Self>, next: AttemptState, delay: Duration) {
        if delay.is_zero() {
            self.submit_attempt(next);
            return;
        }

        let pipeline = Arc::clone(self);
        match &self.client.runtime {
            Some(runtime) => {
                runtime.spawn(async move {
                    tokio::select! {
                        biased;
                        _ = pipeline.task.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                    pipeline.submit_attempt(next);
                });
            }
            None => {
                std::thread::spawn(move || {
                    pipeline.task.sleep_unless_cancelled(delay);
                    pipeline.submit_attempt(next);
                });
            }
        }
    }

    /// Removes the task, deletes its temp file and delivers `response`. Only
    /// the first call has any effect.
    fn finalize(&self, response: NetworkResponse<D::Output>) {
        let Some(delivery) = lock_unpoisoned(&self.delivery).take() else {
            return;
        };

        self.client.registry.remove(&self.task);
        self.task.finish();
        self.client
            .metrics
            .record_request_completed(response.error(), self.started_at.elapsed());
        drop(lock_unpoisoned(&self.in_flight).take());

        debug!(
            success = response.is_success(),
            status = response.status().map(|status| status.as_u16()),
            "request finished"
        );
        self.context.dispatch(move || delivery(response));
    }
}
