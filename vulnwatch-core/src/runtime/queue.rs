use std::{
    collections::{HashSet, VecDeque},
    fmt,
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use tokio::sync::{Mutex, Notify};

/// FIFO of reconcile keys with per-key serialization.
///
/// A key is handed to at most one worker at a time. Adding a key that is
/// already queued is a no-op; adding a key that is being processed marks it
/// dirty and it is queued again once [`WorkQueue::done`] is called, so bursts
/// of observations collapse into one extra reconcile.
pub struct WorkQueue<K> {
    name: &'static str,
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

struct QueueState<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed (queued, or re-added while processing).
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("name", &self.name).finish()
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn add(&self, key: K) {
        let mut state = self.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Registered before inspecting the state so a shutdown between
            // the check and the await is not missed.
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Hand the remaining work to another idle worker.
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks processing of `key` finished, requeueing it if it was added in
    /// the meantime.
    pub async fn done(&self, key: &K) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Keys waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.processing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_adds_coalesce() {
        let queue = WorkQueue::new("test");
        queue.add("a").await;
        queue.add("a").await;
        queue.add("b").await;
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
    }

    #[tokio::test]
    async fn key_is_not_handed_out_twice_while_processing() {
        let queue = WorkQueue::new("test");
        queue.add("a").await;
        assert_eq!(queue.get().await, Some("a"));

        queue.add("a").await;
        queue.add("a").await;
        assert!(queue.is_empty().await, "re-added key waits for done");
        assert_eq!(queue.in_flight().await, 1);

        queue.done(&"a").await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a").await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_workers() {
        let queue: Arc<WorkQueue<&'static str>> = Arc::new(WorkQueue::new("test"));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown().await;
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_delays_the_key() {
        let queue: Arc<WorkQueue<&'static str>> = Arc::new(WorkQueue::new("test"));
        queue.add_after("a", Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(queue.is_empty().await);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.len().await, 1);
    }
}
