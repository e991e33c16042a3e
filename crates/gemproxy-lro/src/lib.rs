use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 10_000;

/// C4: maps a Vertex long-running-operation name to the project id that
/// started it, so that `:fetchPredictOperation` polls are pinned back to the
/// same credential instead of round-robining onto a project that has never
/// heard of the operation.
///
/// Capacity-bounded, FIFO eviction once full. FIFO was picked over TTL
/// because nothing here tells us how long an LRO is expected to run; FIFO
/// needs no background sweep.
pub struct LroAffinityCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl LroAffinityCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Records that `op_name` was started against `project_id`. Last-writer-wins;
    /// the same op_name reappearing is not an expected case.
    pub fn remember(&self, op_name: &str, project_id: &str) {
        let mut guard = self.inner.lock().expect("lro cache lock poisoned");
        if guard.entries.insert(op_name.to_string(), project_id.to_string()).is_none() {
            guard.order.push_back(op_name.to_string());
        }
        while guard.order.len() > self.capacity {
            if let Some(oldest) = guard.order.pop_front() {
                guard.entries.remove(&oldest);
            }
        }
    }

    /// Looks up the project id that started `op_name`. The caller decides what
    /// to do on a miss (normal rotation fallback) — this cache never does it.
    pub fn lookup(&self, op_name: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("lro cache lock poisoned")
            .entries
            .get(op_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lro cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LroAffinityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_and_looks_up() {
        let cache = LroAffinityCache::new();
        cache.remember("projects/999/locations/x/operations/OP1", "proj-a");
        assert_eq!(
            cache.lookup("projects/999/locations/x/operations/OP1").as_deref(),
            Some("proj-a")
        );
    }

    #[test]
    fn miss_returns_none() {
        let cache = LroAffinityCache::new();
        assert_eq!(cache.lookup("does-not-exist"), None);
    }

    #[test]
    fn fifo_eviction_past_capacity() {
        let cache = LroAffinityCache::with_capacity(2);
        cache.remember("op1", "proj-a");
        cache.remember("op2", "proj-b");
        cache.remember("op3", "proj-c");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("op1"), None);
        assert_eq!(cache.lookup("op2").as_deref(), Some("proj-b"));
        assert_eq!(cache.lookup("op3").as_deref(), Some("proj-c"));
    }

    #[test]
    fn last_writer_wins_on_reinsert() {
        let cache = LroAffinityCache::new();
        cache.remember("op1", "proj-a");
        cache.remember("op1", "proj-b");
        assert_eq!(cache.lookup("op1").as_deref(), Some("proj-b"));
        assert_eq!(cache.len(), 1);
    }
}
