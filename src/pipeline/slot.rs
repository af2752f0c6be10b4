//! Single-slot, last-write-wins exchange between pipeline threads

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;

/// Holds the newest published value; older unread values are dropped
///
/// The guard is only held for a swap or a clone. Publishing never waits for
/// readers beyond that, and readers get their own clone of the whole value.
pub struct LatestValueSlot<T> {
    name: &'static str,
    inner: Mutex<Entry<T>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

struct Entry<T> {
    current: Option<T>,
    /// Published but not yet read
    fresh: bool,
}

#[derive(Default)]
struct Stats {
    published: AtomicU64,
    overwritten: AtomicU64,
    reads: AtomicU64,
}

/// Snapshot of slot counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotStats {
    pub published: u64,
    /// Values replaced before any reader saw them
    pub overwritten: u64,
    pub reads: u64,
}

impl<T: Clone> LatestValueSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Mutex::new(Entry {
                current: None,
                fresh: false,
            }),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the held value unconditionally
    pub fn publish(&self, value: T) {
        let (previous, was_fresh) = {
            let mut entry = self.lock();
            let was_fresh = std::mem::replace(&mut entry.fresh, true);
            (entry.current.replace(value), was_fresh)
        };
        // The old value is released outside the guard
        drop(previous);

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        if was_fresh {
            self.stats.overwritten.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("slot_overwritten_total", "slot" => self.name).increment(1);
        }
    }

    /// Consumer: clone of the newest value, or `None` before the first publish
    pub fn read_latest(&self) -> Option<T> {
        let value = {
            let mut entry = self.lock();
            entry.fresh = false;
            entry.current.clone()
        };
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        value
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            published: self.stats.published.load(Ordering::Relaxed),
            overwritten: self.stats.overwritten.load(Ordering::Relaxed),
            reads: self.stats.reads.load(Ordering::Relaxed),
        }
    }

    // Writers only ever swap whole values, so a poisoned guard still holds a
    // complete value.
    fn lock(&self) -> MutexGuard<'_, Entry<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn empty_until_first_publish() {
        let slot: LatestValueSlot<u64> = LatestValueSlot::new("test");
        assert_eq!(slot.read_latest(), None);
        slot.publish(7);
        assert_eq!(slot.read_latest(), Some(7));
        // Reads do not consume
        assert_eq!(slot.read_latest(), Some(7));
    }

    #[test]
    fn newest_publish_wins() {
        let slot = LatestValueSlot::new("test");
        slot.publish(1u64);
        assert_eq!(slot.read_latest(), Some(1));
        for seq in 2..=5u64 {
            slot.publish(seq);
        }
        assert_eq!(slot.read_latest(), Some(5));

        let stats = slot.stats();
        assert_eq!(stats.published, 5);
        // 2, 3 and 4 were never read
        assert_eq!(stats.overwritten, 3);
        assert_eq!(stats.reads, 2);
    }

    #[test]
    fn readers_get_independent_copies() {
        let slot = LatestValueSlot::new("test");
        slot.publish(vec![1u8, 2, 3]);
        let mut copy = slot.read_latest().unwrap();
        copy.push(4);
        assert_eq!(slot.read_latest().unwrap(), vec![1, 2, 3]);
    }

    #[derive(Clone)]
    struct Tagged {
        a: u64,
        payload: Vec<u64>,
        b: u64,
    }

    #[test]
    fn concurrent_readers_never_see_torn_values() {
        let slot = Arc::new(LatestValueSlot::new("tagged"));
        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for pass in 0..20_000u64 {
                    slot.publish(Tagged {
                        a: pass,
                        payload: vec![pass; 16],
                        b: pass,
                    });
                }
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let slot = slot.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..20_000 {
                        if let Some(v) = slot.read_latest() {
                            assert_eq!(v.a, v.b);
                            assert!(v.payload.iter().all(|&p| p == v.a));
                            // Never goes backwards
                            assert!(v.a >= last);
                            last = v.a;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn publish_cost_does_not_depend_on_replaced_value() {
        let slot = LatestValueSlot::new("big");
        slot.publish(vec![0u8; 64 * 1024 * 1024]);
        let start = Instant::now();
        slot.publish(vec![1u8; 1]);
        // Freeing 64 MiB happens after the guard is released but still on
        // this thread; the bound just rules out anything proportional to a copy.
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(slot.read_latest().unwrap().len(), 1);
    }
}
