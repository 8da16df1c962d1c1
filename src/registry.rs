use std::collections::HashMap;
use std::sync::Mutex;

use crate::request::RequestId;
use crate::task::NetworkTask;
use crate::transport::HandleId;
use crate::util::lock_unpoisoned;

/// The set of in-flight tasks, keyed by request identity.
///
/// Every read and write goes through one mutex; no iterator over the map
/// escapes it.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: Mutex<HashMap<RequestId, NetworkTask>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, task: NetworkTask) {
        lock_unpoisoned(&self.tasks).insert(task.id(), task);
    }

    pub(crate) fn find_by_id(&self, id: RequestId) -> Option<NetworkTask> {
        lock_unpoisoned(&self.tasks).get(&id).cloned()
    }

    pub(crate) fn find_by_handle(&self, handle_id: HandleId) -> Option<NetworkTask> {
        lock_unpoisoned(&self.tasks)
            .values()
            .find(|task| task.handle_id() == Some(handle_id))
            .cloned()
    }

    /// Removes `task` if it is the registered task for its identity. Removing
    /// an absent task is a no-op.
    pub(crate) fn remove(&self, task: &NetworkTask) {
        let mut tasks = lock_unpoisoned(&self.tasks);
        if tasks
            .get(&task.id())
            .is_some_and(|registered| registered.same_task(task))
        {
            tasks.remove(&task.id());
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.tasks).len()
    }

    pub(crate) fn snapshot(&self) -> Vec<NetworkTask> {
        lock_unpoisoned(&self.tasks).values().cloned().collect()
    }

    pub(crate) fn drain(&self) -> Vec<NetworkTask> {
        lock_unpoisoned(&self.tasks)
            .drain()
            .map(|(_, task)| task)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use http::Method;

    use super::TaskRegistry;
    use crate::request::NetworkRequest;
    use crate::task::NetworkTask;
    use crate::transport::TransportHandle;

    fn new_task() -> NetworkTask {
        let request = NetworkRequest::get("/a");
        NetworkTask::new(request.id(), Method::GET, "/a".to_owned(), 1)
    }

    #[test]
    fn insert_find_and_idempotent_remove() {
        let registry = TaskRegistry::new();
        let task = new_task();
        let handle = TransportHandle::new();
        assert!(task.begin_attempt(handle.clone(), None, 1));
        registry.insert(task.clone());

        assert!(registry.find_by_id(task.id()).is_some());
        let by_handle = registry
            .find_by_handle(handle.id())
            .expect("task registered under handle");
        assert_eq!(by_handle.id(), task.id());
        assert!(registry.find_by_handle(TransportHandle::new().id()).is_none());

        registry.remove(&task);
        registry.remove(&task);
        assert!(registry.find_by_id(task.id()).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn find_by_handle_follows_retries() {
        let registry = TaskRegistry::new();
        let task = new_task();
        let first = TransportHandle::new();
        assert!(task.begin_attempt(first.clone(), None, 2));
        registry.insert(task.clone());

        let second = TransportHandle::new();
        assert!(task.begin_attempt(second.clone(), None, 1));
        assert!(registry.find_by_handle(first.id()).is_none());
        assert!(registry.find_by_handle(second.id()).is_some());
    }

    #[test]
    fn concurrent_insert_and_remove_leave_registry_empty() {
        let registry = Arc::new(TaskRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let task = new_task();
                        registry.insert(task.clone());
                        assert!(registry.find_by_id(task.id()).is_some());
                        registry.remove(&task);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn drain_empties_registry() {
        let registry = TaskRegistry::new();
        registry.insert(new_task());
        registry.insert(new_task());
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.len(), 0);
    }
}
