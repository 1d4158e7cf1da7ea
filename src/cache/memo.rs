//! Single-flight memo cache with least-recently-used eviction.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::entry::{CacheStats, Counters};

/// Callback run for every entry evicted to stay within capacity.
pub type EvictHook<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

/// A slot holds the value for one key once it has been computed.
///
/// The slot mutex is held for the whole computation, so concurrent callers
/// for the same key queue up behind the first one.
type Slot<V> = Arc<Mutex<Option<V>>>;

struct Slots<K, V> {
    map: HashMap<K, Slot<V>>,
    /// Populated keys, least recently used first.
    order: VecDeque<K>,
}

/// Memoizes fallible computations by key.
///
/// See the [module docs](crate::cache) for the guarantees.
pub struct MemoCache<K, V> {
    name: &'static str,
    capacity: Option<usize>,
    slots: RwLock<Slots<K, V>>,
    counters: Counters,
    on_evict: Option<EvictHook<K, V>>,
}

impl<K, V> fmt::Debug for MemoCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCache")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("on_evict", &self.on_evict.as_ref().map(|_| "<hook>"))
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Create a cache that keeps at most `capacity` entries.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn bounded(name: &'static str, capacity: usize) -> Self {
        Self::with_capacity(name, Some(capacity.max(1)))
    }

    /// Create a cache that never evicts.
    #[must_use]
    pub fn unbounded(name: &'static str) -> Self {
        Self::with_capacity(name, None)
    }

    fn with_capacity(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            name,
            capacity,
            slots: RwLock::new(Slots {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            counters: Counters::default(),
            on_evict: None,
        }
    }

    /// Run `hook` on every entry evicted for capacity.
    #[must_use]
    pub fn with_evict_hook(mut self, hook: EvictHook<K, V>) -> Self {
        self.on_evict = Some(hook);
        self
    }

    /// Return the cached value for `key`, or compute and store it.
    ///
    /// `compute` runs at most once per key while it keeps succeeding. An
    /// error is returned to the caller and nothing is stored.
    pub fn get_or_try_insert_with<E, F>(&self, key: &K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot_for(key);
        let mut guard = lock(&slot);

        if let Some(value) = guard.as_ref() {
            let value = value.clone();
            drop(guard);
            self.counters.hit();
            log::trace!("{} cache hit: {:?}", self.name, key);
            self.touch(key);
            return Ok(value);
        }

        self.counters.miss();
        log::trace!("{} cache miss: {:?}", self.name, key);

        match compute() {
            Ok(value) => {
                *guard = Some(value.clone());
                drop(guard);
                self.record(key, &slot);
                Ok(value)
            }
            Err(err) => {
                drop(guard);
                self.discard_if_idle(key, &slot);
                Err(err)
            }
        }
    }

    /// Return the cached value for `key` without computing anything.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            slots.map.get(key).cloned()
        }?;
        // Does not wait behind an in-flight computation.
        let value = match slot.try_lock() {
            Ok(guard) => guard.clone(),
            Err(std::sync::TryLockError::Poisoned(p)) => p.into_inner().clone(),
            Err(std::sync::TryLockError::WouldBlock) => None,
        };
        value
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Returns true if no value is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.len())
    }

    fn slot_for(&self, key: &K) -> Slot<V> {
        {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.map.get(key) {
                return Arc::clone(slot);
            }
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.map.entry(key.clone()).or_default())
    }

    /// Move a populated key to the most recently used end.
    fn touch(&self, key: &K) {
        if self.capacity.is_none() {
            return;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = slots.order.iter().position(|k| k == key) {
            if let Some(k) = slots.order.remove(pos) {
                slots.order.push_back(k);
            }
        }
    }

    /// Mark `key` as populated and evict the least recently used entries
    /// beyond capacity.
    fn record(&self, key: &K, slot: &Slot<V>) {
        let evicted = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            let current = slots.map.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
            if !current {
                return;
            }
            slots.order.push_back(key.clone());

            let mut evicted = Vec::new();
            if let Some(capacity) = self.capacity {
                while slots.order.len() > capacity {
                    let Some(old_key) = slots.order.pop_front() else {
                        break;
                    };
                    if let Some(old_slot) = slots.map.remove(&old_key) {
                        evicted.push((old_key, old_slot));
                    }
                }
            }
            evicted
        };

        if evicted.is_empty() {
            return;
        }
        self.counters.evicted(evicted.len() as u64);
        for (old_key, old_slot) in evicted {
            log::debug!("{} cache evicted: {:?}", self.name, old_key);
            if let Some(hook) = &self.on_evict {
                let value = lock(&old_slot).clone();
                if let Some(value) = value {
                    hook(&old_key, &value);
                }
            }
        }
    }

    /// Forget an empty slot after a failed computation, unless another caller
    /// is already waiting on it and will retry in place.
    fn discard_if_idle(&self, key: &K, slot: &Slot<V>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let idle = slots
            .map
            .get(key)
            .is_some_and(|s| Arc::ptr_eq(s, slot) && Arc::strong_count(s) == 2);
        if idle {
            slots.map.remove(key);
        }
    }
}
