use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::NetworkError;
use crate::transport::TransportResult;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NetworkMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub attempts: u64,
    pub retries: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    /// Per attempt.
    pub status_counts: BTreeMap<u16, u64>,
    /// Per attempt, keyed by transport error kind.
    pub transport_error_counts: BTreeMap<String, u64>,
    /// Per request, keyed by error code.
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct NetworkMetrics {
    inner: Option<Arc<NetworkMetricsInner>>,
}

#[derive(Debug, Default)]
struct NetworkMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    requests_cancelled: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    transport_error_counts: Mutex<BTreeMap<String, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    inner: Option<Arc<NetworkMetricsInner>>,
}

impl NetworkMetrics {
    pub(crate) fn enabled() -> Self {
        Self {
            inner: Some(Arc::new(NetworkMetricsInner::default())),
        }
    }

    pub(crate) fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn record_request_started(&self) -> InFlightGuard {
        match &self.inner {
            Some(inner) => {
                inner.requests_started.fetch_add(1, Ordering::Relaxed);
                inner.in_flight.fetch_add(1, Ordering::Relaxed);
                InFlightGuard {
                    inner: Some(Arc::clone(inner)),
                }
            }
            None => InFlightGuard { inner: None },
        }
    }

    pub(crate) fn record_retry(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self, result: &TransportResult) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.attempts.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(response) => {
                let mut status_counts = lock_unpoisoned(&inner.status_counts);
                *status_counts
                    .entry(response.head.status.as_u16())
                    .or_insert(0) += 1;
            }
            Err(error) => {
                let mut transport_error_counts = lock_unpoisoned(&inner.transport_error_counts);
                *transport_error_counts
                    .entry(error.kind.as_str().to_owned())
                    .or_insert(0) += 1;
            }
        }
    }

    pub(crate) fn record_request_completed(
        &self,
        error: Option<&NetworkError>,
        latency: Duration,
    ) {
        let Some(inner) = &self.inner else {
            return;
        };

        match error {
            None => {
                inner.requests_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Some(error) => {
                if error.is_cancelled() {
                    inner.requests_cancelled.fetch_add(1, Ordering::Relaxed);
                } else {
                    inner.requests_failed.fetch_add(1, Ordering::Relaxed);
                }
                let mut error_counts = lock_unpoisoned(&inner.error_counts);
                *error_counts
                    .entry(error.code().as_str().to_owned())
                    .or_insert(0) += 1;
            }
        }

        inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    pub(crate) fn snapshot(&self) -> NetworkMetricsSnapshot {
        let Some(inner) = &self.inner else {
            return NetworkMetricsSnapshot::default();
        };

        let latency_samples = inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        NetworkMetricsSnapshot {
            requests_started: inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: inner.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: inner.requests_cancelled.load(Ordering::Relaxed),
            attempts: inner.attempts.load(Ordering::Relaxed),
            retries: inner.retries.load(Ordering::Relaxed),
            in_flight: inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&inner.status_counts).clone(),
            transport_error_counts: lock_unpoisoned(&inner.transport_error_counts).clone(),
            error_counts: lock_unpoisoned(&inner.error_counts).clone(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
