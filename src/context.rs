use std::sync::Arc;

use tokio::runtime::Handle;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

type ExecutorFn = dyn Fn(Job) + Send + Sync + 'static;

/// Where completion handlers and per-request hooks run.
#[derive(Clone)]
pub enum CompletionContext {
    /// On whichever thread produced the event.
    Inline,
    /// Spawned as a task on a tokio runtime.
    Runtime(Handle),
    /// Handed to a caller-supplied executor, e.g. a channel drained by a UI thread.
    Executor(Arc<ExecutorFn>),
}

impl CompletionContext {
    pub fn executor<F>(executor: F) -> Self
    where
        F: Fn(Job) + Send + Sync + 'static,
    {
        Self::Executor(Arc::new(executor))
    }

    /// The current tokio runtime when there is one, otherwise inline.
    pub fn current() -> Self {
        match Handle::try_current() {
            Ok(handle) => Self::Runtime(handle),
            Err(_) => Self::Inline,
        }
    }

    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Self::Inline => job(),
            Self::Runtime(handle) => {
                handle.spawn(async move { job() });
            }
            Self::Executor(executor) => executor(Box::new(job)),
        }
    }
}

impl Default for CompletionContext {
    fn default() -> Self {
        Self::current()
    }
}

impl std::fmt::Debug for CompletionContext {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => formatter.write_str("CompletionContext::Inline"),
            Self::Runtime(_) => formatter.write_str("CompletionContext::Runtime"),
            Self::Executor(_) => formatter.write_str("CompletionContext::Executor"),
        }
    }
}
