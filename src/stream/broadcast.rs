use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default per-viewer queue depth, in parts.
pub const DEFAULT_VIEWER_QUEUE_DEPTH: usize = 4;

/// One encoded, already-framed part, shared by every viewer.
pub type Part = Arc<[u8]>;

struct Subscriber {
    id: u64,
    tx: Sender<Part>,
    /// Producer-side handle used to evict the oldest queued part when full.
    evict: Receiver<Part>,
}

struct Shared {
    subscribers: Mutex<Vec<Subscriber>>,
    depth: usize,
    next_id: AtomicU64,
    closed: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Counters for the broadcaster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub viewers: usize,
    pub published: u64,
    /// Parts evicted from full viewer queues.
    pub dropped: u64,
}

/// Fans produced parts out to every connected viewer.
///
/// Each viewer owns a bounded queue. Publishing never blocks: when a viewer's
/// queue is full its oldest part is evicted to make room. Viewers start at the
/// next published part; nothing is replayed.
#[derive(Clone)]
pub struct FrameBroadcaster {
    shared: Arc<Shared>,
}

impl FrameBroadcaster {
    pub fn new(depth: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Vec::new()),
                depth: depth.max(1),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new viewer. After `close`, the returned stream is already ended.
    pub fn subscribe(&self) -> ViewerStream {
        let (tx, rx) = crossbeam_channel::bounded(self.shared.depth);
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subscribers = self.shared.subscribers();
        // Checked under the lock so a concurrent close cannot strand this viewer.
        if !self.shared.closed.load(Ordering::SeqCst) {
            subscribers.push(Subscriber {
                id,
                tx,
                evict: rx.clone(),
            });
        }
        drop(subscribers);
        ViewerStream {
            id,
            rx,
            shared: self.shared.clone(),
        }
    }

    /// Deliver `part` to every viewer. Returns how many viewers received it.
    pub fn publish(&self, part: Vec<u8>) -> usize {
        let part: Part = part.into();
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.shared.subscribers();
        let mut delivered = 0;
        subscribers.retain(|sub| match sub.tx.try_send(part.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(part)) => {
                if sub.evict.try_recv().is_ok() {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                }
                if sub.tx.try_send(part).is_ok() {
                    delivered += 1;
                }
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    /// End every viewer stream. Queued parts are still delivered first.
    pub fn close(&self) {
        let mut subscribers = self.shared.subscribers();
        self.shared.closed.store(true, Ordering::SeqCst);
        subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn viewer_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            viewers: self.viewer_count(),
            published: self.shared.published.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWER_QUEUE_DEPTH)
    }
}

/// One viewer's independent cursor over the live part sequence.
///
/// Iteration blocks for the next part and ends once the broadcaster is closed
/// and the queue is drained. Dropping the stream unsubscribes the viewer.
pub struct ViewerStream {
    id: u64,
    rx: Receiver<Part>,
    shared: Arc<Shared>,
}

/// Result of a bounded wait on a viewer stream.
#[derive(Debug)]
pub enum ViewerPoll {
    Part(Part),
    Idle,
    Closed,
}

impl ViewerStream {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait at most `timeout` for the next part.
    pub fn poll(&self, timeout: Duration) -> ViewerPoll {
        match self.rx.recv_timeout(timeout) {
            Ok(part) => ViewerPoll::Part(part),
            Err(RecvTimeoutError::Timeout) => ViewerPoll::Idle,
            Err(RecvTimeoutError::Disconnected) => ViewerPoll::Closed,
        }
    }
}

impl Iterator for ViewerStream {
    type Item = Part;

    fn next(&mut self) -> Option<Part> {
        self.rx.recv().ok()
    }
}

impl Drop for ViewerStream {
    fn drop(&mut self) {
        let id = self.id;
        self.shared.subscribers().retain(|sub| sub.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u8) -> Vec<u8> {
        vec![n; 4]
    }

    #[test]
    fn every_viewer_receives_each_part() {
        let hub = FrameBroadcaster::new(4);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish(part(1)), 2);
        assert_eq!(a.next().as_deref(), Some(&part(1)[..]));
        assert_eq!(b.next().as_deref(), Some(&part(1)[..]));
    }

    #[test]
    fn late_viewer_starts_from_now() {
        let hub = FrameBroadcaster::new(4);
        let _early = hub.subscribe();
        hub.publish(part(1));

        let late = hub.subscribe();
        hub.publish(part(2));
        hub.close();

        let seen: Vec<Part> = late.collect();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0][..], &part(2)[..]);
    }

    #[test]
    fn full_queue_drops_oldest_without_blocking() {
        let hub = FrameBroadcaster::new(2);
        let slow = hub.subscribe();

        for n in 1..=5 {
            assert_eq!(hub.publish(part(n)), 1);
        }
        hub.close();

        let seen: Vec<u8> = slow.map(|p| p[0]).collect();
        assert_eq!(seen, vec![4, 5]);
        assert_eq!(hub.stats().dropped, 3);
    }

    #[test]
    fn slow_viewer_does_not_starve_fast_one() {
        let hub = FrameBroadcaster::new(1);
        let _stalled = hub.subscribe();
        let fast = hub.subscribe();

        for n in 1..=10 {
            hub.publish(part(n));
            assert_eq!(fast.poll(Duration::from_millis(10)).part_byte(), Some(n));
        }
    }

    #[test]
    fn dropping_a_viewer_unsubscribes_it() {
        let hub = FrameBroadcaster::new(2);
        let a = hub.subscribe();
        let _b = hub.subscribe();
        assert_eq!(hub.viewer_count(), 2);

        drop(a);
        assert_eq!(hub.viewer_count(), 1);
        assert_eq!(hub.publish(part(1)), 1);
    }

    #[test]
    fn close_ends_streams_and_rejects_new_viewers() {
        let hub = FrameBroadcaster::new(2);
        let viewer = hub.subscribe();
        hub.close();

        assert!(matches!(
            viewer.poll(Duration::from_millis(10)),
            ViewerPoll::Closed
        ));
        let mut late = hub.subscribe();
        assert!(late.next().is_none());
        assert_eq!(hub.viewer_count(), 0);
    }

    impl ViewerPoll {
        fn part_byte(&self) -> Option<u8> {
            match self {
                ViewerPoll::Part(p) => p.first().copied(),
                _ => None,
            }
        }
    }
}
