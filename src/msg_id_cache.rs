//! Expiring message ID cache.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::local_addr::LocalAddr;
use crate::timer::Timer;

/// Associative cache of recently seen `(peer address, message ID)` pairs,
/// used to detect duplicates and replays.
///
/// Entries are kept in per-address buckets keyed by expiry tick. An embedded
/// [`Timer`] advances the tick counter every `time_unit` and drops the
/// buckets that expire at it, so every entry survives at least
/// `max_age * time_unit` and at most `(max_age + 1) * time_unit`.
pub struct MsgIdCache {
    inner: Arc<Mutex<CacheInner>>,
    max_age: u8,
    _timer: Timer,
}

struct CacheInner {
    /// Tick counter, used instead of timestamps. Wraps.
    tick: u16,
    /// Address -> expiry tick -> set of message IDs.
    entries: HashMap<LocalAddr, HashMap<u16, HashSet<u16>>>,
}

impl CacheInner {
    fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        let tick = self.tick;

        self.entries.retain(|_, buckets| {
            buckets.remove(&tick);
            !buckets.is_empty()
        });
    }
}

impl MsgIdCache {
    /// Creates the cache and spawns its eviction timer on the current tokio
    /// runtime. `max_age` must be at least 1 (validated by the owning node).
    pub fn new(time_unit: Duration, max_age: u8) -> Self {
        let inner = Arc::new(Mutex::new(CacheInner {
            tick: 0,
            entries: HashMap::new(),
        }));

        let timer_inner = Arc::clone(&inner);
        let timer = Timer::spawn(time_unit, move || {
            let inner = Arc::clone(&timer_inner);
            async move {
                inner.lock().expect("msg ID cache lock poisoned").tick();
            }
        });

        Self {
            inner,
            max_age,
            _timer: timer,
        }
    }

    /// Records `(addr, id)` unless it is already present anywhere in the
    /// address' buckets. Returns `false` for duplicates.
    pub fn insert(&self, addr: &LocalAddr, id: u16) -> bool {
        let mut inner = self.inner.lock().expect("msg ID cache lock poisoned");
        let expiry = inner
            .tick
            .wrapping_add(self.max_age as u16)
            .wrapping_add(1);

        let buckets = inner.entries.entry(addr.clone()).or_default();
        if buckets.values().any(|ids| ids.contains(&id)) {
            return false;
        }
        buckets.entry(expiry).or_default().insert(id);
        true
    }

    #[cfg(test)]
    fn tick_num(&self) -> u16 {
        self.inner.lock().expect("msg ID cache lock poisoned").tick
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("msg ID cache lock poisoned")
            .entries
            .is_empty()
    }
}
