//! Observing effects whose arrival time is not locally knowable: a bounded
//! predicate poll and an open-ended, cancellable log subscription.

use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ethers::types::{Address, Filter, Log, H256};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use superchain_common::metrics::MetricsCollector;
use superchain_common::{ChainId, ConfigurationError, EventLog, ObserverConfig};

use crate::binding::ContractBinding;
use crate::rpc::{ChainRpc, RpcError};

/// Shortest pause between two predicate evaluations.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `predicate` every `interval` until it returns true or `timeout`
/// has elapsed.
///
/// Returns `false` on timeout. That is the expected "not observed yet"
/// outcome for a slow cross-chain message, not a failure. The predicate is
/// evaluated once more at the deadline before giving up. Intervals below
/// [`MIN_POLL_INTERVAL`] are raised to it.
pub async fn wait_until<F, Fut>(mut predicate: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let interval = interval.max(MIN_POLL_INTERVAL);
    let metrics = MetricsCollector::new();
    let started = Instant::now();

    loop {
        metrics.increment_poll_attempt();
        if predicate().await {
            return true;
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            debug!("Predicate still false after {:?}", elapsed);
            return false;
        }

        sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Narrows a subscription beyond its chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Option<Address>,
    pub topic0: Option<H256>,
}

impl LogFilter {
    fn to_filter(self, from_block: u64, to_block: u64) -> Filter {
        let mut filter = Filter::new().from_block(from_block).to_block(to_block);
        if let Some(address) = self.address {
            filter = filter.address(address);
        }
        if let Some(topic) = self.topic0 {
            filter = filter.topic0(topic);
        }
        filter
    }
}

/// Walks a chain's logs forward from a starting block in bounded ranges.
struct LogScanner {
    chain_id: ChainId,
    rpc: Arc<dyn ChainRpc>,
    filter: LogFilter,
    next_block: u64,
    max_range: u64,
}

impl LogScanner {
    /// Fetches the next range. Returns the logs in (block, log index) order
    /// and whether the scan has reached the head. The cursor only moves when
    /// the whole range was read, so a failed request is retried as is.
    async fn poll(&mut self) -> Result<(Vec<EventLog>, bool), RpcError> {
        let head = self.rpc.block_number().await?;
        if head < self.next_block {
            return Ok((Vec::new(), true));
        }

        let to_block = head.min(self.next_block.saturating_add(self.max_range - 1));
        let logs = self
            .rpc
            .get_logs(&self.filter.to_filter(self.next_block, to_block))
            .await?;

        let mut events: Vec<EventLog> = logs
            .into_iter()
            .filter_map(|log| to_event_log(self.chain_id, log))
            .filter(|event| event.block_number >= self.next_block && event.block_number <= to_block)
            .collect();
        events.sort_by_key(EventLog::position);

        debug!(
            "Scanned blocks {}..={} on chain {}: {} logs",
            self.next_block,
            to_block,
            self.chain_id,
            events.len()
        );
        self.next_block = to_block + 1;
        Ok((events, to_block == head))
    }
}

fn to_event_log(chain_id: ChainId, log: Log) -> Option<EventLog> {
    if log.removed == Some(true) {
        return None;
    }
    let block_number = log.block_number?.as_u64();

    Some(EventLog {
        chain_id,
        address: log.address,
        topics: log.topics,
        data: log.data,
        block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    })
}

type Callback = Box<dyn FnMut(EventLog) + Send>;

thread_local! {
    // Delivery currently running on this thread, so a callback that cancels
    // its own subscription does not wait on itself.
    static DELIVERING: Cell<usize> = Cell::new(0);
}

struct Delivery {
    cancelled: AtomicBool,
    callback: Mutex<Option<Callback>>,
}

impl Delivery {
    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    /// Runs the callback unless cancelled. Returns whether delivery may go on.
    fn deliver(self: &Arc<Self>, event: EventLog) -> bool {
        let mut callback = lock(&self.callback);
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        let Some(callback) = callback.as_mut() else {
            return false;
        };

        let previous = DELIVERING.with(|current| current.replace(self.key()));
        callback(event);
        DELIVERING.with(|current| current.set(previous));

        !self.cancelled.load(Ordering::SeqCst)
    }

    /// Stops delivery. From outside any callback this waits for an in-flight
    /// callback to return. From inside a callback it never blocks: two
    /// callbacks cancelling each other's subscriptions on different threads
    /// would otherwise wait on each other forever. In that case a callback
    /// already running elsewhere may still finish, but no new one starts.
    fn close(self: &Arc<Self>) {
        self.cancelled.store(true, Ordering::SeqCst);
        let current = DELIVERING.with(|current| current.get());
        if current == self.key() {
            return;
        }
        if current != 0 {
            if let Ok(mut callback) = self.callback.try_lock() {
                callback.take();
            }
            return;
        }
        lock(&self.callback).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SubscriptionState {
    chain_id: ChainId,
    from_block: u64,
    delivery: Arc<Delivery>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running log subscription.
///
/// Scanning continues until [`Subscription::cancel`] is called; dropping the
/// handle does not stop it. Clones share the same subscription.
#[derive(Clone)]
#[must_use = "the subscription keeps polling until `cancel` is called"]
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    pub fn chain_id(&self) -> ChainId {
        self.state.chain_id
    }

    pub fn from_block(&self) -> u64 {
        self.state.from_block
    }

    /// Stops the scan loop. Once this returns the callback will not be
    /// invoked again. Safe to call repeatedly, from any clone, and from
    /// inside the callback itself.
    pub fn cancel(&self) {
        self.state.delivery.close();

        if let Some(task) = lock(&self.state.task).take() {
            task.abort();
            MetricsCollector::new().subscription_closed();
            info!("Cancelled log subscription on chain {}", self.state.chain_id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.delivery.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("chain_id", &self.state.chain_id)
            .field("from_block", &self.state.from_block)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Watches chains bound to a contract for state changes and logs.
pub struct CrossChainObserver {
    binding: Arc<ContractBinding>,
    config: ObserverConfig,
    metrics: MetricsCollector,
}

impl CrossChainObserver {
    pub fn new(binding: Arc<ContractBinding>, config: ObserverConfig) -> Self {
        Self {
            binding,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub async fn wait_until<F, Fut>(&self, predicate: F, timeout: Duration, interval: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        wait_until(predicate, timeout, interval).await
    }

    /// Delivers every log on `chain_id` from `from_block` onward, in block
    /// order and emission order within a block, until cancelled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_events<F>(
        &self,
        chain_id: ChainId,
        from_block: u64,
        on_log: F,
    ) -> Result<Subscription, ConfigurationError>
    where
        F: FnMut(EventLog) + Send + 'static,
    {
        self.watch(chain_id, from_block, LogFilter::default(), Box::new(on_log))
    }

    /// Like [`watch_events`](Self::watch_events) but limited to logs emitted
    /// by the bound contract and, when `event` is given, to that event.
    pub fn watch_contract_events<F>(
        &self,
        chain_id: ChainId,
        from_block: u64,
        event: Option<&str>,
        on_log: F,
    ) -> Result<Subscription, ConfigurationError>
    where
        F: FnMut(EventLog) + Send + 'static,
    {
        let topic0 = event
            .map(|name| self.binding.event_topic(name))
            .transpose()
            .map_err(|e| ConfigurationError::InvalidArtifact(e.to_string()))?;
        let filter = LogFilter {
            address: Some(self.binding.address()),
            topic0,
        };
        self.watch(chain_id, from_block, filter, Box::new(on_log))
    }

    fn watch(
        &self,
        chain_id: ChainId,
        from_block: u64,
        filter: LogFilter,
        on_log: Callback,
    ) -> Result<Subscription, ConfigurationError> {
        let handle = self.binding.handle(chain_id)?;
        let mut scanner = LogScanner {
            chain_id,
            rpc: handle.rpc().clone(),
            filter,
            next_block: from_block,
            max_range: self.config.max_block_range.max(1),
        };
        let delivery = Arc::new(Delivery {
            cancelled: AtomicBool::new(false),
            callback: Mutex::new(Some(on_log)),
        });
        let interval = self.config.poll_interval();
        let metrics = self.metrics;

        let task = {
            let delivery = delivery.clone();
            tokio::spawn(async move {
                loop {
                    match scanner.poll().await {
                        Ok((events, caught_up)) => {
                            let count = events.len();
                            for event in events {
                                if !delivery.deliver(event) {
                                    return;
                                }
                            }
                            metrics.increment_logs_delivered(count);
                            if !caught_up {
                                continue;
                            }
                        }
                        Err(e) => {
                            warn!(
                                "Log scan on chain {} from block {} failed, retrying: {}",
                                chain_id, scanner.next_block, e
                            );
                        }
                    }
                    sleep(interval).await;
                }
            })
        };

        metrics.subscription_opened();
        info!("Watching logs on chain {} from block {}", chain_id, from_block);

        Ok(Subscription {
            state: Arc::new(SubscriptionState {
                chain_id,
                from_block,
                delivery,
                task: Mutex::new(Some(task)),
            }),
        })
    }
}
