use crate::queue::store::{DeadLetter, FjallQueue, QueueError, Result};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Broker is the owned connection to one durable work queue
///
/// Architecture:
/// 1. Producer calls `broker.publish(body)`
/// 2. Broker persists the body to FjallQueue (gets seq) and appends seq to the ready list
/// 3. Each `Consumer` holds a semaphore with `prefetch` permits; a permit is taken
///    before a delivery is handed out and released when it is settled
/// 4. `Delivery::ack` removes the message; `Delivery::nack(true)` or dropping an
///    unsettled delivery puts it back at the head of the ready list
/// 5. Messages still stored at open time are redelivered (at-least-once)
///
/// Open it once at startup, share it via `Arc`, and call `close()` on shutdown.
pub struct Broker {
    queue: FjallQueue,
    ready: Mutex<VecDeque<u64>>,
    redelivered: Mutex<HashSet<u64>>,
    notify: Notify,
    in_flight: AtomicUsize,
    acknowledged: AtomicU64,
    closed: AtomicBool,
    #[cfg(test)]
    failing_reads: AtomicUsize,
}

/// Point-in-time broker counters
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub queue: String,
    pub ready: usize,
    pub in_flight: usize,
    pub acknowledged: u64,
    pub dead_letters: usize,
}

impl Broker {
    /// Open the queue `queue_name` stored at `path`
    ///
    /// Every message found in storage becomes ready again. Messages that were
    /// handed out but never acknowledged are flagged as redelivered.
    pub fn open<P: AsRef<Path>>(path: P, queue_name: &str) -> Result<Self> {
        let queue = FjallQueue::open(path, queue_name)?;

        let pending = queue.pending()?;
        let mut redelivered = HashSet::new();
        for &seq in &pending {
            if queue.was_inflight(seq)? {
                redelivered.insert(seq);
            }
        }

        info!(
            queue = queue_name,
            pending = pending.len(),
            redelivered = redelivered.len(),
            "Broker opened"
        );

        Ok(Self {
            queue,
            ready: Mutex::new(pending.into()),
            redelivered: Mutex::new(redelivered),
            notify: Notify::new(),
            in_flight: AtomicUsize::new(0),
            acknowledged: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            #[cfg(test)]
            failing_reads: AtomicUsize::new(0),
        })
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Persist a message and make it available to consumers
    ///
    /// Returns the sequence number assigned by the store.
    pub fn publish(&self, body: &[u8]) -> Result<u64> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let seq = self.queue.append(body)?;
        lock(&self.ready).push_back(seq);
        self.notify.notify_one();

        debug!(queue = %self.queue_name(), seq, "Message published");

        Ok(seq)
    }

    /// Register a consumer that holds at most `prefetch` unsettled deliveries
    pub fn consume(self: &Arc<Self>, prefetch: usize) -> Consumer {
        let prefetch = prefetch.max(1);
        debug!(queue = %self.queue_name(), prefetch, "Consumer registered");

        Consumer {
            broker: Arc::clone(self),
            permits: Arc::new(Semaphore::new(prefetch)),
        }
    }

    /// Stop handing out deliveries and flush storage
    ///
    /// Consumers blocked in `next()` return `None`. Deliveries still held by
    /// callers can be settled after close.
    pub fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
            self.queue.flush()?;
            info!(queue = %self.queue_name(), "Broker closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Result<BrokerStats> {
        Ok(BrokerStats {
            queue: self.queue_name().to_string(),
            ready: lock(&self.ready).len(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            acknowledged: self.acknowledged.load(Ordering::SeqCst),
            dead_letters: self.queue.dead_letter_count()?,
        })
    }

    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.queue.list_dead_letters(limit)
    }

    fn pop_ready(&self) -> Option<u64> {
        lock(&self.ready).pop_front()
    }

    /// Load `seq` and mark it in flight
    ///
    /// On a storage error the message goes back to the head of the ready list
    /// so the next attempt picks it up again.
    fn begin_delivery(&self, seq: u64) -> Result<Option<Vec<u8>>> {
        let loaded = self.load_inflight(seq);
        if loaded.is_err() {
            lock(&self.ready).push_front(seq);
            self.notify.notify_one();
        }
        loaded
    }

    fn load_inflight(&self, seq: u64) -> Result<Option<Vec<u8>>> {
        #[cfg(test)]
        if self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::Io(std::io::Error::other("injected read failure")));
        }

        let Some(body) = self.queue.get(seq)? else {
            return Ok(None);
        };
        self.queue.mark_inflight(seq)?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(Some(body))
    }

    /// Make the next `count` delivery attempts fail with a storage error
    #[cfg(test)]
    pub(crate) fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    fn requeue(&self, seq: u64) {
        lock(&self.redelivered).insert(seq);
        lock(&self.ready).push_front(seq);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn settle(&self, seq: u64) -> Result<()> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        lock(&self.redelivered).remove(&seq);
        self.queue.remove(seq)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receiving side of the broker with bounded prefetch
pub struct Consumer {
    broker: Arc<Broker>,
    permits: Arc<Semaphore>,
}

impl Consumer {
    /// Wait for the next message
    ///
    /// Blocks while `prefetch` deliveries are outstanding or the queue is
    /// empty. Returns `Ok(None)` once the broker is closed.
    pub async fn next(&self) -> Result<Option<Delivery>> {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Ok(None);
        };

        loop {
            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.broker.is_closed() {
                return Ok(None);
            }

            if let Some(seq) = self.broker.pop_ready() {
                let Some(body) = self.broker.begin_delivery(seq)? else {
                    warn!(seq, "Ready message missing from store, skipping");
                    continue;
                };

                let redelivered = lock(&self.broker.redelivered).contains(&seq);

                debug!(seq, redelivered, "Message delivered");

                return Ok(Some(Delivery {
                    seq,
                    body,
                    redelivered,
                    broker: Arc::clone(&self.broker),
                    _permit: permit,
                    settled: false,
                }));
            }

            notified.await;
        }
    }

    /// Number of deliveries this consumer may still take before blocking
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A message handed to exactly one consumer
///
/// Must be settled with `ack` or `nack`. Dropping it unsettled requeues the
/// message, which is how a crashed handler turns into a redelivery.
pub struct Delivery {
    seq: u64,
    body: Vec<u8>,
    redelivered: bool,
    broker: Arc<Broker>,
    _permit: OwnedSemaphorePermit,
    settled: bool,
}

impl Delivery {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Keep a copy of this message in the dead-letter partition
    ///
    /// Does not settle the delivery.
    pub fn record_dead_letter(&self, failure_code: &str, failure_message: &str) -> Result<()> {
        self.broker
            .queue
            .record_dead_letter(self.seq, failure_code, failure_message)
    }

    /// Retire the message permanently
    pub fn ack(mut self) -> Result<()> {
        self.settled = true;
        self.broker.settle(self.seq)?;
        self.broker.acknowledged.fetch_add(1, Ordering::SeqCst);
        debug!(seq = self.seq, "Message acknowledged");
        Ok(())
    }

    /// Reject the message, either back onto the queue or dropped
    pub fn nack(mut self, requeue: bool) -> Result<()> {
        self.settled = true;
        if requeue {
            self.broker.requeue(self.seq);
            debug!(seq = self.seq, "Message requeued");
            Ok(())
        } else {
            debug!(seq = self.seq, "Message rejected");
            self.broker.settle(self.seq)
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            warn!(seq = self.seq, "Delivery dropped without settlement, requeueing");
            self.broker.requeue(self.seq);
        }
    }
}
