use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use http::Method;
use tempfile::TempPath;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::request::RequestId;
use crate::transport::{HandleId, TransportHandle};
use crate::util::lock_unpoisoned;

/// Registry-tracked handle to the active attempt of one request.
///
/// Clones share state. The transport handle is replaced on every retry while
/// the identity stays the same.
#[derive(Clone)]
pub struct NetworkTask {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    id: RequestId,
    method: Method,
    path: String,
    max_attempts: usize,
    state: Mutex<TaskState>,
    cancel_signal: Condvar,
    cancellation: CancellationToken,
    finished: AtomicBool,
}

#[derive(Default)]
struct TaskState {
    handle: Option<TransportHandle>,
    temp_file: Option<TempPath>,
    cancelled: bool,
    remaining_attempts: usize,
}

impl NetworkTask {
    pub(crate) fn new(id: RequestId, method: Method, path: String, max_attempts: usize) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                method,
                path,
                max_attempts,
                state: Mutex::new(TaskState {
                    remaining_attempts: max_attempts,
                    ..TaskState::default()
                }),
                cancel_signal: Condvar::new(),
                cancellation: CancellationToken::new(),
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn max_attempts(&self) -> usize {
        self.inner.max_attempts
    }

    pub fn remaining_attempts(&self) -> usize {
        lock_unpoisoned(&self.inner.state).remaining_attempts
    }

    pub fn handle_id(&self) -> Option<HandleId> {
        lock_unpoisoned(&self.inner.state)
            .handle
            .as_ref()
            .map(TransportHandle::id)
    }

    /// Cancels the live transport attempt. The request's completion still
    /// fires once, with a cancelled outcome.
    pub fn cancel(&self) {
        let handle = {
            let mut state = lock_unpoisoned(&self.inner.state);
            state.cancelled = true;
            state.handle.clone()
        };
        self.inner.cancel_signal.notify_all();
        self.inner.cancellation.cancel();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        lock_unpoisoned(&self.inner.state).cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub(crate) async fn cancelled(&self) {
        self.inner.cancellation.cancelled().await;
    }

    /// Blocks the calling thread for `delay` or until the task is cancelled,
    /// whichever comes first. Returns `true` when woken by cancellation.
    pub(crate) fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let state = lock_unpoisoned(&self.inner.state);
        let (state, _) = self
            .inner
            .cancel_signal
            .wait_timeout_while(state, delay, |state| !state.cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        state.cancelled
    }

    /// Installs the handle and temp file of a new attempt, releasing the
    /// previous attempt's temp file. Returns `false` when the task was
    /// cancelled or finished in the meantime; the new temp file is then
    /// removed immediately.
    pub(crate) fn begin_attempt(
        &self,
        handle: TransportHandle,
        temp_file: Option<TempPath>,
        remaining_attempts: usize,
    ) -> bool {
        let previous = {
            let mut state = lock_unpoisoned(&self.inner.state);
            if state.cancelled || self.is_finished() {
                drop(state);
                remove_temp_file(self.inner.id, temp_file);
                return false;
            }
            state.handle = Some(handle);
            state.remaining_attempts = remaining_attempts;
            std::mem::replace(&mut state.temp_file, temp_file)
        };
        remove_temp_file(self.inner.id, previous);
        true
    }

    /// Marks the task finished and deletes its temp file. Only the first call
    /// does anything.
    pub(crate) fn finish(&self) -> bool {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        let temp_file = {
            let mut state = lock_unpoisoned(&self.inner.state);
            state.handle = None;
            state.temp_file.take()
        };
        remove_temp_file(self.inner.id, temp_file);
        true
    }

    pub(crate) fn same_task(&self, other: &NetworkTask) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for NetworkTask {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NetworkTask")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("path", &self.inner.path)
            .field("remaining_attempts", &self.remaining_attempts())
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn remove_temp_file(id: RequestId, temp_file: Option<TempPath>) {
    let Some(temp_file) = temp_file else {
        return;
    };
    let path = temp_file.to_path_buf();
    if let Err(error) = temp_file.close() {
        debug!(
            request_id = %id,
            path = %path.display(),
            error = %error,
            "failed to remove multipart temp file"
        );
    }
}
