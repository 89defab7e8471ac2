//! Bounded hand-off of draw lists from the simulation thread to the render thread.
//!
//! The queue is single-producer / single-consumer: [`frame_queue`] returns one
//! [`FrameProducer`] and one [`FrameConsumer`], neither of which is `Clone`.
//! Draw lists are recycled through a shared pool so a steady-state frame
//! allocates nothing. Lists are always delivered in submission order.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};

use crate::draw_list::DrawList;

/// What the producer does when the queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Wait for the consumer. Nothing is ever lost (offline export).
    #[default]
    Block,
    /// Evict the oldest queued list. Latency stays bounded (realtime playback).
    DropOldest,
}

/// Returned by [`FrameProducer::submit`] once the consumer is gone. Carries the
/// rejected list back to the caller.
#[derive(Debug, thiserror::Error)]
#[error("frame consumer has shut down")]
pub struct SubmitError(pub DrawList);

#[derive(Default)]
struct Pool {
    free: Mutex<Vec<DrawList>>,
    allocated: AtomicUsize,
}

impl Pool {
    fn take(&self) -> DrawList {
        let recycled = self.free.lock().unwrap_or_else(|e| e.into_inner()).pop();
        recycled.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            DrawList::new()
        })
    }

    fn put(&self, mut list: DrawList) {
        list.reset();
        self.free.lock().unwrap_or_else(|e| e.into_inner()).push(list);
    }

    fn len(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct Shared {
    pool: Pool,
    consumer_alive: AtomicBool,
    dropped: AtomicU64,
}

/// Create a queue holding at most `capacity` submitted lists (minimum 1).
pub fn frame_queue(capacity: usize, policy: OverflowPolicy) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let shared = Arc::new(Shared {
        pool: Pool::default(),
        consumer_alive: AtomicBool::new(true),
        dropped: AtomicU64::new(0),
    });

    // Only DropOldest needs to pull from the queue on the producer side. Block
    // must not hold a receiver, or a vanished consumer would never disconnect it.
    let evict = match policy {
        OverflowPolicy::DropOldest => Some(rx.clone()),
        OverflowPolicy::Block => None,
    };

    let producer = FrameProducer {
        tx,
        evict,
        shared: Arc::clone(&shared),
    };
    let consumer = FrameConsumer {
        rx,
        shared,
        finished: false,
    };
    (producer, consumer)
}

/// Simulation-side end of the queue.
pub struct FrameProducer {
    tx: Sender<DrawList>,
    evict: Option<Receiver<DrawList>>,
    shared: Arc<Shared>,
}

impl FrameProducer {
    /// A reset draw list, from the pool when one is available.
    pub fn acquire_draw_list(&self) -> DrawList {
        self.shared.pool.take()
    }

    /// Hand a populated list to the render thread.
    ///
    /// Ownership moves into the queue, so the list cannot be touched again
    /// until it comes back out of [`acquire_draw_list`](Self::acquire_draw_list).
    pub fn submit(&self, list: DrawList) -> Result<(), SubmitError> {
        match &self.evict {
            None => self.tx.send(list).map_err(|e| SubmitError(e.into_inner())),
            Some(evict) => self.submit_drop_oldest(evict, list),
        }
    }

    fn submit_drop_oldest(&self, evict: &Receiver<DrawList>, mut list: DrawList) -> Result<(), SubmitError> {
        loop {
            if !self.shared.consumer_alive.load(Ordering::Acquire) {
                return Err(SubmitError(list));
            }
            match self.tx.try_send(list) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(rejected)) => return Err(SubmitError(rejected)),
                Err(TrySendError::Full(rejected)) => {
                    list = rejected;
                    // The consumer may have drained it in the meantime; just retry.
                    if let Ok(oldest) = evict.try_recv() {
                        let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        log::debug!("Frame queue full, dropped oldest frame ({} total)", dropped);
                        self.shared.pool.put(oldest);
                    }
                }
            }
        }
    }

    /// Give back a list that was acquired but will not be submitted.
    pub fn recycle(&self, list: DrawList) {
        self.shared.pool.put(list);
    }

    /// Lists evicted under [`OverflowPolicy::DropOldest`].
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn is_consumer_alive(&self) -> bool {
        self.shared.consumer_alive.load(Ordering::Acquire)
    }
}

/// Render-side end of the queue.
pub struct FrameConsumer {
    rx: Receiver<DrawList>,
    shared: Arc<Shared>,
    finished: bool,
}

impl FrameConsumer {
    /// Next list in submission order, without blocking.
    pub fn try_dequeue(&mut self) -> Option<DrawList> {
        match self.rx.try_recv() {
            Ok(list) => Some(list),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                None
            }
        }
    }

    /// Next list, waiting up to `timeout` for the producer.
    pub fn dequeue_timeout(&mut self, timeout: Duration) -> Option<DrawList> {
        match self.rx.recv_timeout(timeout) {
            Ok(list) => Some(list),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = true;
                None
            }
        }
    }

    /// Reset a fully rendered list and return it to the pool.
    pub fn release(&self, list: DrawList) {
        self.shared.pool.put(list);
    }

    /// The producer is gone and every submitted list has been dequeued.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Lists currently sitting in the pool.
    pub fn pooled(&self) -> usize {
        self.shared.pool.len()
    }

    /// Lists allocated since the queue was created.
    pub fn allocated(&self) -> usize {
        self.shared.pool.allocated.load(Ordering::Relaxed)
    }
}

impl Drop for FrameConsumer {
    fn drop(&mut self) {
        self.shared.consumer_alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_at(producer: &FrameProducer, time: f64) -> DrawList {
        let mut list = producer.acquire_draw_list();
        list.time = time;
        list
    }

    #[test]
    fn test_fifo_order() {
        let (producer, mut consumer) = frame_queue(4, OverflowPolicy::Block);
        for i in 0..4 {
            producer.submit(list_at(&producer, i as f64)).unwrap();
        }
        for i in 0..4 {
            assert_eq!(consumer.try_dequeue().unwrap().time, i as f64);
        }
        assert!(consumer.try_dequeue().is_none());
        assert!(!consumer.is_finished());
    }

    #[test]
    fn test_release_recycles_lists() {
        let (producer, mut consumer) = frame_queue(2, OverflowPolicy::Block);
        for frame in 0..10 {
            let mut list = producer.acquire_draw_list();
            list.clear_color = [frame as f32, 0.0, 0.0, 1.0];
            producer.submit(list).unwrap();
            let list = consumer.try_dequeue().unwrap();
            consumer.release(list);
        }
        assert_eq!(consumer.allocated(), 1);
        assert_eq!(consumer.pooled(), 1);
        // Recycled lists come back reset.
        assert_eq!(producer.acquire_draw_list().clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let (producer, mut consumer) = frame_queue(2, OverflowPolicy::DropOldest);
        for i in 0..5 {
            producer.submit(list_at(&producer, i as f64)).unwrap();
        }
        assert_eq!(producer.dropped_frames(), 3);
        assert_eq!(consumer.try_dequeue().unwrap().time, 3.0);
        assert_eq!(consumer.try_dequeue().unwrap().time, 4.0);
        // Evicted lists went back to the pool and were reused by later acquires.
        assert_eq!(consumer.allocated(), 3);
        assert_eq!(consumer.pooled(), 1);
    }

    #[test]
    fn test_block_waits_for_consumer() {
        let (producer, mut consumer) = frame_queue(1, OverflowPolicy::Block);
        let handle = std::thread::spawn(move || {
            for i in 0..50 {
                producer.submit(list_at(&producer, i as f64)).unwrap();
            }
        });

        let mut received = Vec::new();
        while received.len() < 50 {
            if let Some(list) = consumer.dequeue_timeout(Duration::from_secs(5)) {
                received.push(list.time);
                consumer.release(list);
            }
        }
        handle.join().unwrap();

        let expected: Vec<f64> = (0..50).map(|i| i as f64).collect();
        assert_eq!(received, expected);
        assert!(consumer.dequeue_timeout(Duration::from_millis(10)).is_none());
        assert!(consumer.is_finished());
    }

    #[test]
    fn test_submit_fails_after_consumer_drop() {
        let (producer, consumer) = frame_queue(1, OverflowPolicy::Block);
        drop(consumer);
        let err = producer.submit(list_at(&producer, 7.0)).unwrap_err();
        assert_eq!(err.0.time, 7.0);

        let (producer, consumer) = frame_queue(1, OverflowPolicy::DropOldest);
        drop(consumer);
        assert!(!producer.is_consumer_alive());
        assert!(producer.submit(producer.acquire_draw_list()).is_err());
    }

    #[test]
    fn test_finished_after_producer_drop() {
        let (producer, mut consumer) = frame_queue(2, OverflowPolicy::Block);
        producer.submit(producer.acquire_draw_list()).unwrap();
        drop(producer);
        assert!(consumer.try_dequeue().is_some());
        assert!(!consumer.is_finished());
        assert!(consumer.try_dequeue().is_none());
        assert!(consumer.is_finished());
    }
}
