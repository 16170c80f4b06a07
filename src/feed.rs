// Realtime feed subscription — delivers each inserted row to a callback.
//
// `subscribe` opens the event log's insert feed and drives it from a
// background task. The callback runs under a gate that `unsubscribe` closes,
// so once `unsubscribe` returns no further callback invocation can start.
// Callbacks must not call `unsubscribe` on their own subscription.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::{EventLog, InterestEvent};

/// Live handle to an insert feed. Dropping it unsubscribes.
pub struct Subscription {
    /// `true` while callbacks may run
    gate: Arc<Mutex<bool>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    backend: &'static str,
}

/// Open an insert feed on `log` and invoke `on_insert` once per notification,
/// in delivery order.
pub async fn subscribe<F>(log: &dyn EventLog, on_insert: F) -> Result<Subscription>
where
    F: Fn(&InterestEvent) + Send + Sync + 'static,
{
    let mut feed = log.subscribe_inserts().await?;
    let gate = Arc::new(Mutex::new(true));
    let worker_gate = Arc::clone(&gate);
    let backend = log.name();

    let worker = tokio::spawn(async move {
        while let Some(event) = feed.next().await {
            let delivered = {
                let open = lock(&worker_gate);
                if *open {
                    on_insert(&event);
                }
                *open
            };
            if !delivered {
                break;
            }
        }
        debug!(backend, "Insert feed ended");
    });

    info!(backend, "Insert feed subscribed");
    Ok(Subscription {
        gate,
        worker: Mutex::new(Some(worker)),
        backend,
    })
}

impl Subscription {
    /// Stop delivery and release the feed connection.
    ///
    /// Returns `true` the first time and `false` on every later call. Waits
    /// for an in-flight callback to finish before closing the gate.
    pub fn unsubscribe(&self) -> bool {
        let was_open = std::mem::replace(&mut *lock(&self.gate), false);

        if let Some(worker) = lock(&self.worker).take() {
            // Aborting drops the feed, which closes the backend connection.
            worker.abort();
        }

        if was_open {
            info!(backend = self.backend, "Insert feed unsubscribed");
        }
        was_open
    }

    /// Whether callbacks can still be delivered.
    pub fn is_active(&self) -> bool {
        *lock(&self.gate)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Lock ignoring poisoning; a panicking callback must not wedge teardown.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
