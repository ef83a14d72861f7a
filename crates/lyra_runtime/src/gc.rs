//! Closure lifetime bookkeeping.
//!
//! The tracker holds weak references to every live closure, a reverse index
//! from captured variable name to closure ids, and a flag set for closures
//! participating in 2-hop capture cycles. One mutex guards all of it.
//!
//! Capture sharing: the first closure to capture a variable gets a private
//! snapshot. When a second live closure captures the same name, the slot is
//! promoted to one shared boxed cell installed in every capturing
//! environment, so later writes through any of them are mutually visible.
//! The promotion seeds the cell with the newest snapshot.
//!
//! Sweeps run periodically (every N instructions and every K returns, see
//! `VmConfig`) and drop expired entries, stale reverse-index ids, and flags.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::value::{ClosureData, Value};
use crate::core::{Environment, FastHashMap};

type FastHashSet<T> = hashbrown::HashSet<T, ahash::RandomState>;

#[derive(Default)]
struct Inner {
    entries: FastHashMap<u64, Weak<ClosureData>>,
    by_var: FastHashMap<String, Vec<u64>>,
    flagged: FastHashSet<u64>,
}

#[derive(Default)]
pub struct ClosureTracker {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl ClosureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a freshly created closure: promotes shared capture slots,
    /// updates the reverse index, and runs the 2-hop cycle check.
    pub fn register(&self, closure: &Arc<ClosureData>) {
        let mut inner = self.inner.lock();

        for name in &closure.captured {
            let peers: Vec<Arc<ClosureData>> = inner
                .by_var
                .get(name.as_str())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.entries.get(id).and_then(Weak::upgrade))
                        .collect()
                })
                .unwrap_or_default();

            if let Some(first) = peers.first() {
                let cell = first
                    .env
                    .promote_shared(name)
                    .unwrap_or_else(|| Arc::new(Mutex::new(Value::Nil)));
                for peer in peers.iter().skip(1) {
                    peer.env.install_shared(name.clone(), cell.clone());
                }
                let snapshot = closure.env.get(name).unwrap_or(Value::Nil);
                *cell.lock() = snapshot;
                closure.env.install_shared(name.clone(), cell);
            }

            inner.by_var.entry(name.clone()).or_default().push(closure.id);
        }

        if has_two_hop_cycle(closure) {
            tracing::debug!(id = closure.id, name = %closure.function_name, "closure capture cycle");
            inner.flagged.insert(closure.id);
        }

        inner.entries.insert(closure.id, Arc::downgrade(closure));
    }

    /// Drops entries whose closure has been freed, along with their reverse
    /// index ids and flags.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, weak| weak.strong_count() > 0);

        let Inner { entries, by_var, flagged } = &mut *inner;
        for ids in by_var.values_mut() {
            ids.retain(|id| entries.contains_key(id));
        }
        by_var.retain(|_, ids| !ids.is_empty());
        flagged.retain(|id| entries.contains_key(id));

        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::trace!(dropped, live = entries.len(), "closure sweep");
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_flagged(&self, id: u64) -> bool {
        self.inner.lock().flagged.contains(&id)
    }
}

/// True when a closure captured by `closure` in turn captures `closure`.
fn has_two_hop_cycle(closure: &Arc<ClosureData>) -> bool {
    for name in &closure.captured {
        let Some(Value::Closure(inner)) = closure.env.get(name) else {
            continue;
        };
        for inner_name in &inner.captured {
            if let Some(Value::Closure(back)) = inner.env.get(inner_name) {
                if back.id == closure.id {
                    return true;
                }
            }
        }
    }
    false
}

/// Builds a closure environment from captured (name, value) pairs. The chain
/// roots at the globals so closure bodies still see global bindings without
/// seeing their creator's locals.
pub fn capture_environment(
    globals: &Arc<Environment>,
    pairs: &[(String, Value)],
) -> Arc<Environment> {
    let env = Environment::child(globals);
    for (name, value) in pairs {
        env.define(name.clone(), value.clone());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_closure(
        tracker: &ClosureTracker,
        globals: &Arc<Environment>,
        name: &str,
        pairs: &[(String, Value)],
    ) -> Arc<ClosureData> {
        let env = capture_environment(globals, pairs);
        let closure = Arc::new(ClosureData {
            id: tracker.next_id(),
            function_name: name.to_string(),
            start: 1,
            end: 2,
            env,
            captured: pairs.iter().map(|(n, _)| n.clone()).collect(),
        });
        tracker.register(&closure);
        closure
    }

    #[test]
    fn second_capture_promotes_to_shared_cell() {
        let tracker = ClosureTracker::new();
        let globals = Environment::root();
        let a = make_closure(&tracker, &globals, "a", &[("n".into(), Value::Int64(1))]);
        let b = make_closure(&tracker, &globals, "b", &[("n".into(), Value::Int64(2))]);
        // Promotion seeds with the newest snapshot.
        assert_eq!(a.env.get("n").unwrap().as_i64(), Some(2));
        b.env.assign("n", Value::Int64(9));
        assert_eq!(a.env.get("n").unwrap().as_i64(), Some(9));
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let tracker = ClosureTracker::new();
        let globals = Environment::root();
        let a = make_closure(&tracker, &globals, "a", &[("x".into(), Value::Int64(1))]);
        let _b = make_closure(&tracker, &globals, "b", &[("y".into(), Value::Int64(2))]);
        assert_eq!(tracker.live_count(), 2);
        drop(a);
        tracker.sweep();
        assert_eq!(tracker.live_count(), 1);
    }

    #[test]
    fn two_hop_cycle_is_flagged() {
        let tracker = ClosureTracker::new();
        let globals = Environment::root();
        let a = make_closure(&tracker, &globals, "a", &[]);
        let b = make_closure(
            &tracker,
            &globals,
            "b",
            &[("a".into(), Value::Closure(a.clone()))],
        );
        // Retro-wire a's capture of b, then register a fresh closure through
        // the same env to exercise the check.
        a.env.define("b", Value::Closure(b.clone()));
        let c = Arc::new(ClosureData {
            id: a.id,
            function_name: "a".into(),
            start: 1,
            end: 2,
            env: a.env.clone(),
            captured: vec!["b".into()],
        });
        tracker.register(&c);
        assert!(tracker.is_flagged(a.id));
    }
}
