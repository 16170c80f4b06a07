// Interest counter — the number shown to visitors.
//
// On mount the counter reads the log's row count once and shows
// `count + offset`; it then subscribes to inserts and adds one per
// notification until unmounted. The value only ever goes up. Without
// resync it is never reconciled with the table again, so notifications
// missed during a feed outage are lost for the lifetime of the mount.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::feed::{self, Subscription};
use crate::store::EventLog;

/// Lifecycle of a mounted counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    /// Initial count not read yet; the value is the bare offset.
    Uninitialized,
    /// Initial read done (or failed); feed notifications are applied.
    Live,
    /// Torn down; the value is frozen.
    Unmounted,
}

/// Tunables for a mounted counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOptions {
    /// Baseline added to the row count
    pub offset: u64,
    /// Re-read the row count at this interval and raise the value if it lags
    pub resync: Option<Duration>,
}

impl CounterOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            offset: config.interest_offset,
            resync: config.counter_resync,
        }
    }
}

/// One mounted view of the interest count.
pub struct InterestCounter {
    value: Arc<watch::Sender<u64>>,
    state: Arc<watch::Sender<CounterState>>,
    slot: Arc<Mutex<SubscriptionSlot>>,
    mount_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct SubscriptionSlot {
    unmounted: bool,
    subscription: Option<Subscription>,
}

impl InterestCounter {
    /// Mount a counter on `log`. Returns immediately showing the offset; the
    /// initial count and the feed subscription happen in the background.
    pub fn mount(log: Arc<dyn EventLog>, options: CounterOptions) -> Self {
        let (value, _) = watch::channel(options.offset);
        let (state, _) = watch::channel(CounterState::Uninitialized);
        let value = Arc::new(value);
        let state = Arc::new(state);
        let slot = Arc::new(Mutex::new(SubscriptionSlot::default()));

        let mount_task = tokio::spawn(run_mount(
            log,
            options,
            Arc::clone(&value),
            Arc::clone(&state),
            Arc::clone(&slot),
        ));

        Self {
            value,
            state,
            slot,
            mount_task: Mutex::new(Some(mount_task)),
        }
    }

    /// Current displayed value.
    pub fn interested_count(&self) -> u64 {
        *self.value.borrow()
    }

    /// Receiver notified on every change of the displayed value.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.value.subscribe()
    }

    pub fn state(&self) -> CounterState {
        *self.state.borrow()
    }

    /// Wait until the initial count has been applied (or has failed), or the
    /// counter was unmounted first.
    pub async fn ready(&self) {
        let mut state = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = state
            .wait_for(|s| *s != CounterState::Uninitialized)
            .await;
    }

    /// Tear the counter down: cancel the feed subscription and stop the
    /// background task. Returns `false` if it was already unmounted.
    pub fn unmount(&self) -> bool {
        let subscription = {
            let mut slot = lock(&self.slot);
            if slot.unmounted {
                return false;
            }
            slot.unmounted = true;
            self.state.send_replace(CounterState::Unmounted);
            slot.subscription.take()
        };

        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(task) = lock(&self.mount_task).take() {
            task.abort();
        }

        info!(value = self.interested_count(), "Interest counter unmounted");
        true
    }
}

impl Drop for InterestCounter {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn run_mount(
    log: Arc<dyn EventLog>,
    options: CounterOptions,
    value: Arc<watch::Sender<u64>>,
    state: Arc<watch::Sender<CounterState>>,
    slot: Arc<Mutex<SubscriptionSlot>>,
) {
    match log.count_rows().await {
        Ok(rows) => {
            value.send_replace(rows.saturating_add(options.offset));
            debug!(rows, offset = options.offset, "Initial interest count applied");
        }
        Err(e) => {
            warn!(error = %e, offset = options.offset, "Initial interest count failed; showing baseline");
        }
    }

    let increment = Arc::clone(&value);
    let subscription = match feed::subscribe(log.as_ref(), move |_| {
        increment.send_modify(|v| *v = v.saturating_add(1));
    })
    .await
    {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            warn!(error = %e, "Could not open insert feed; counter will not update");
            None
        }
    };

    {
        let mut slot = lock(&slot);
        if slot.unmounted {
            if let Some(subscription) = subscription {
                subscription.unsubscribe();
            }
            return;
        }
        slot.subscription = subscription;
        state.send_replace(CounterState::Live);
    }
    info!(value = *value.borrow(), "Interest counter live");

    if let Some(interval) = options.resync {
        resync_loop(log.as_ref(), options.offset, interval, &value).await;
    }
}

/// Periodically raise the value to `count + offset` when it has fallen
/// behind (e.g. after notifications were missed). Never lowers it.
async fn resync_loop(
    log: &dyn EventLog,
    offset: u64,
    interval: Duration,
    value: &watch::Sender<u64>,
) {
    loop {
        tokio::time::sleep(interval).await;
        match log.count_rows().await {
            Ok(rows) => {
                let fresh = rows.saturating_add(offset);
                let raised = value.send_if_modified(|current| {
                    if fresh > *current {
                        *current = fresh;
                        true
                    } else {
                        false
                    }
                });
                if raised {
                    info!(value = fresh, "Interest counter resynced upward");
                }
            }
            Err(e) => debug!(error = %e, "Interest resync count failed"),
        }
    }
}

/// One-off `count + offset`, falling back to the offset when the count fails.
pub async fn current_interest(log: &dyn EventLog, offset: u64) -> u64 {
    match log.count_rows().await {
        Ok(rows) => rows.saturating_add(offset),
        Err(e) => {
            warn!(error = %e, "Interest count failed; reporting baseline");
            offset
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
