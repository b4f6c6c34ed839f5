//! In-memory membership set.
//!
//! The store is the authoritative view of who is currently in a monitored
//! channel. It never talks to the remote store; the write serializer reads
//! a [`MembershipStore::snapshot`] when a sync actually executes.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::identity::MemberLabel;

/// Thread-safe set of tracked member labels.
#[derive(Debug, Default)]
pub struct MembershipStore {
    labels: RwLock<BTreeSet<MemberLabel>>,
}

impl MembershipStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Discard all labels and install `labels` in one step.
    pub fn replace_all(&self, labels: impl IntoIterator<Item = MemberLabel>) {
        let next: BTreeSet<MemberLabel> = labels.into_iter().collect();
        let mut guard = self.labels.write().unwrap_or_else(PoisonError::into_inner);
        trace!(before = guard.len(), after = next.len(), "replacing membership");
        *guard = next;
    }

    /// Add a label. Returns `false` if it was already present.
    pub fn add(&self, label: MemberLabel) -> bool {
        self.labels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label)
    }

    /// Remove a label. Returns `false` if it was absent.
    pub fn remove(&self, label: &MemberLabel) -> bool {
        self.labels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(label)
    }

    pub fn contains(&self, label: &MemberLabel) -> bool {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(label)
    }

    pub fn len(&self) -> usize {
        self.labels.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current labels as an ordered sequence.
    ///
    /// Row order on the remote record follows this order; callers should
    /// not rely on it beyond determinism.
    pub fn snapshot(&self) -> Vec<MemberLabel> {
        self.labels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};

    use proptest::prelude::*;

    fn label(s: &str) -> MemberLabel {
        MemberLabel::from(s)
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = MembershipStore::new();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_add_is_idempotent() {
        let store = MembershipStore::new();
        assert!(store.add(label("alice")));
        assert!(!store.add(label("alice")));
        assert_eq!(store.snapshot(), vec![label("alice")]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let store = MembershipStore::new();
        store.add(label("alice"));
        assert!(!store.remove(&label("bob")));
        assert_eq!(store.snapshot(), vec![label("alice")]);
    }

    #[test]
    fn test_replace_all_discards_previous() {
        let store = MembershipStore::new();
        store.add(label("alice"));
        store.add(label("bob"));

        store.replace_all(vec![label("carol"), label("carol"), label("dave")]);

        assert_eq!(store.snapshot(), vec![label("carol"), label("dave")]);
        assert!(!store.contains(&label("alice")));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(u8),
        Leave(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..6).prop_map(Op::Join), (0u8..6).prop_map(Op::Leave)]
    }

    proptest! {
        #[test]
        fn final_set_matches_net_effect(ops in prop::collection::vec(op(), 0..64)) {
            let store = MembershipStore::new();
            let mut last: HashMap<u8, bool> = HashMap::new();

            for op in &ops {
                match op {
                    Op::Join(id) => {
                        store.add(label(&format!("user{id}")));
                        last.insert(*id, true);
                    }
                    Op::Leave(id) => {
                        store.remove(&label(&format!("user{id}")));
                        last.insert(*id, false);
                    }
                }
            }

            let expected: BTreeSet<MemberLabel> = last
                .into_iter()
                .filter(|(_, present)| *present)
                .map(|(id, _)| label(&format!("user{id}")))
                .collect();
            let actual: BTreeSet<MemberLabel> = store.snapshot().into_iter().collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn repeated_ops_do_not_change_set(names in prop::collection::vec("[a-z]{1,6}", 0..16)) {
            let store = MembershipStore::new();
            for n in &names {
                store.add(label(n));
            }
            let before = store.snapshot();

            for n in &names {
                store.add(label(n));
            }
            store.remove(&label("NOT-PRESENT"));

            prop_assert_eq!(store.snapshot(), before);
        }
    }
}
