//! Cancellable deadlines
//!
//! Each armed timeout is a tokio task sleeping on the scheduler's runtime
//! handle. Refresh and action deadlines are bounded: arming one beyond
//! [`TimeoutScheduler::CAPACITY`] evicts the oldest of them. The single
//! resurface and persist deadlines never count toward the bound and are
//! never evicted.
//!
//! A deadline that already woke up can still race with `disarm`. The
//! callback only runs if the entry it was armed under is still present,
//! and receivers check broadcast ids on top of that.

use crate::actions::ActionKey;
use crate::error::TimeoutError;
use indexmap::IndexMap;
use parking_lot::Mutex;
use sc_model::BroadcastId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// What a deadline guards
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimeoutKey {
    /// Sources of a refresh must answer
    Refresh(BroadcastId),
    /// A resolving action must report back
    ResolveAction(ActionKey),
    /// Earliest dismissed issue resurfaces
    Resurface,
    /// Dirty dismissal records get written
    PersistWrite,
}

impl TimeoutKey {
    /// Whether the deadline counts toward [`TimeoutScheduler::CAPACITY`]
    #[inline]
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        matches!(self, TimeoutKey::Refresh(_) | TimeoutKey::ResolveAction(_))
    }
}

impl fmt::Display for TimeoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKey::Refresh(id) => write!(f, "refresh:{id}"),
            TimeoutKey::ResolveAction(key) => write!(f, "action:{key}"),
            TimeoutKey::Resurface => f.write_str("resurface"),
            TimeoutKey::PersistWrite => f.write_str("persist"),
        }
    }
}

struct Armed {
    generation: u64,
    task: JoinHandle<()>,
}

/// Armed deadlines in arming order
#[derive(Default)]
struct Entries {
    armed: IndexMap<TimeoutKey, Armed>,
    generation: u64,
}

impl Entries {
    fn bounded_len(&self) -> usize {
        self.armed.keys().filter(|key| key.is_bounded()).count()
    }

    /// Remove the oldest bounded deadline
    fn evict_oldest_bounded(&mut self) -> Option<(TimeoutKey, Armed)> {
        let index = self.armed.keys().position(TimeoutKey::is_bounded)?;
        self.armed.shift_remove_index(index)
    }

    /// Remove `key` only if it is still armed under `generation`
    fn take_fired(&mut self, key: &TimeoutKey, generation: u64) -> bool {
        if self
            .armed
            .get(key)
            .is_some_and(|armed| armed.generation == generation)
        {
            self.armed.shift_remove(key);
            true
        } else {
            false
        }
    }
}

/// Bounded set of named deadlines
#[derive(Clone)]
pub struct TimeoutScheduler {
    handle: Handle,
    entries: Arc<Mutex<Entries>>,
}

impl fmt::Debug for TimeoutScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("TimeoutScheduler")
            .field("armed", &entries.armed.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TimeoutScheduler {
    /// Most refresh and action deadlines tracked at once
    pub const CAPACITY: usize = 10;

    /// Scheduler spawning on `handle`
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            entries: Arc::new(Mutex::new(Entries::default())),
        }
    }

    /// Scheduler spawning on the runtime of the calling context
    pub fn current() -> Result<Self, TimeoutError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TimeoutError::NoRuntime(e.to_string()))
    }

    /// Run `on_fire` once after `delay`, replacing any deadline under `key`
    pub fn arm<F>(&self, key: TimeoutKey, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut entries = self.entries.lock();
        if let Some(previous) = entries.armed.shift_remove(&key) {
            previous.task.abort();
        }
        while key.is_bounded() && entries.bounded_len() >= Self::CAPACITY {
            let Some((oldest, armed)) = entries.evict_oldest_bounded() else {
                break;
            };
            tracing::warn!(
                "Too many timeouts tracked, evicting {} to arm {}",
                oldest,
                key
            );
            armed.task.abort();
        }

        entries.generation += 1;
        let generation = entries.generation;
        let shared = Arc::clone(&self.entries);
        let fired_key = key.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.lock().take_fired(&fired_key, generation) {
                tracing::debug!("Timeout {} fired", fired_key);
                on_fire();
            }
        });
        tracing::debug!("Armed timeout {} for {:?}", key, delay);
        entries.armed.insert(key, Armed { generation, task });
    }

    /// Cancel `key`; returns whether it was armed
    pub fn disarm(&self, key: &TimeoutKey) -> bool {
        match self.entries.lock().armed.shift_remove(key) {
            Some(armed) => {
                armed.task.abort();
                tracing::debug!("Disarmed timeout {}", key);
                true
            }
            None => false,
        }
    }

    /// Cancel every deadline matching `predicate`
    pub fn disarm_matching(&self, predicate: impl Fn(&TimeoutKey) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.armed.len();
        entries.armed.retain(|key, armed| {
            if predicate(key) {
                armed.task.abort();
                false
            } else {
                true
            }
        });
        before - entries.armed.len()
    }

    /// Cancel everything
    pub fn disarm_all(&self) {
        let drained: Vec<(TimeoutKey, Armed)> = self.entries.lock().armed.drain(..).collect();
        for (_, armed) in drained {
            armed.task.abort();
        }
    }

    /// Whether `key` is armed and has not fired
    #[must_use]
    pub fn is_armed(&self, key: &TimeoutKey) -> bool {
        self.entries.lock().armed.contains_key(key)
    }

    /// Number of armed deadlines
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().armed.len()
    }

    /// Whether nothing is armed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let shared = Arc::clone(&count);
        let make = move || {
            let c = Arc::clone(&shared);
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (count, make)
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let scheduler = TimeoutScheduler::current().unwrap();
        let (count, make) = counter();
        scheduler.arm(TimeoutKey::Resurface, Duration::from_secs(5), make());

        settle(Duration::from_secs(4)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_armed(&TimeoutKey::Resurface));

        settle(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timeout_never_fires() {
        let scheduler = TimeoutScheduler::current().unwrap();
        let (count, make) = counter();
        scheduler.arm(TimeoutKey::PersistWrite, Duration::from_secs(1), make());

        assert!(scheduler.disarm(&TimeoutKey::PersistWrite));
        assert!(!scheduler.disarm(&TimeoutKey::PersistWrite));
        settle(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_deadline() {
        let scheduler = TimeoutScheduler::current().unwrap();
        let (count, make) = counter();
        scheduler.arm(TimeoutKey::PersistWrite, Duration::from_secs(1), make());
        scheduler.arm(TimeoutKey::PersistWrite, Duration::from_secs(3), make());
        assert_eq!(scheduler.len(), 1);

        settle(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        settle(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_oldest_beyond_capacity() {
        let scheduler = TimeoutScheduler::current().unwrap();
        let (count, make) = counter();
        for i in 0..=TimeoutScheduler::CAPACITY {
            let key = TimeoutKey::Refresh(BroadcastId::new(format!("r{i}")));
            scheduler.arm(key, Duration::from_secs(1), make());
        }

        assert_eq!(scheduler.len(), TimeoutScheduler::CAPACITY);
        assert!(!scheduler.is_armed(&TimeoutKey::Refresh(BroadcastId::new("r0"))));
        settle(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), TimeoutScheduler::CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn resurface_and_persist_survive_a_full_scheduler() {
        let scheduler = TimeoutScheduler::current().unwrap();
        let (count, make) = counter();
        scheduler.arm(TimeoutKey::Resurface, Duration::from_secs(60), make());
        scheduler.arm(TimeoutKey::PersistWrite, Duration::from_secs(30), make());
        for i in 0..(2 * TimeoutScheduler::CAPACITY) {
            let key = TimeoutKey::Refresh(BroadcastId::new(format!("r{i}")));
            scheduler.arm(key, Duration::from_secs(1), make());
        }

        assert_eq!(scheduler.len(), TimeoutScheduler::CAPACITY + 2);
        assert!(scheduler.is_armed(&TimeoutKey::Resurface));
        assert!(scheduler.is_armed(&TimeoutKey::PersistWrite));
        assert!(!scheduler.is_armed(&TimeoutKey::Refresh(BroadcastId::new("r9"))));
        assert!(scheduler.is_armed(&TimeoutKey::Refresh(BroadcastId::new("r10"))));

        settle(Duration::from_secs(61)).await;
        assert_eq!(count.load(Ordering::SeqCst), TimeoutScheduler::CAPACITY + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_matching_filters() {
        let scheduler = TimeoutScheduler::current().unwrap();
        let (_count, make) = counter();
        scheduler.arm(TimeoutKey::Resurface, Duration::from_secs(1), make());
        scheduler.arm(
            TimeoutKey::Refresh(BroadcastId::new("x")),
            Duration::from_secs(1),
            make(),
        );

        let removed = scheduler.disarm_matching(|k| matches!(k, TimeoutKey::Refresh(_)));
        assert_eq!(removed, 1);
        assert!(scheduler.is_armed(&TimeoutKey::Resurface));
        scheduler.disarm_all();
        assert!(scheduler.is_empty());
    }

    #[test]
    fn requires_runtime() {
        assert!(matches!(
            TimeoutScheduler::current(),
            Err(TimeoutError::NoRuntime(_))
        ));
    }
}
