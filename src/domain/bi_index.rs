//! Paired forward/inverse index kept consistent on every mutation.
//!
//! [`BiIndex`] maps each left key to a set of right keys and maintains the
//! inverse mapping alongside it. Both sides share one rule: a key whose set
//! becomes empty is removed, so the index never holds an empty set. Callers
//! learn about those transitions from the returned [`Insertion`] and
//! [`Removal`] instead of re-checking emptiness themselves.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// What changed when a pair was inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Insertion {
    /// The pair was not present before.
    pub added: bool,
    /// The left key had no entries before this insert.
    pub left_created: bool,
    /// The right key had no entries before this insert.
    pub right_created: bool,
}

/// What changed when a pair was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Removal {
    /// The pair was present and has been removed.
    pub removed: bool,
    /// The left key now has no entries and was dropped.
    pub left_emptied: bool,
    /// The right key now has no entries and was dropped.
    pub right_emptied: bool,
}

/// Bidirectional many-to-many index.
#[derive(Debug, Clone)]
pub struct BiIndex<L, R> {
    forward: HashMap<L, HashSet<R>>,
    inverse: HashMap<R, HashSet<L>>,
}

impl<L, R> Default for BiIndex<L, R> {
    fn default() -> Self {
        Self {
            forward: HashMap::new(),
            inverse: HashMap::new(),
        }
    }
}

impl<L, R> BiIndex<L, R>
where
    L: Eq + Hash + Clone,
    R: Eq + Hash + Clone,
{
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the pair `(left, right)` on both sides.
    pub fn insert(&mut self, left: L, right: R) -> Insertion {
        let left_created = !self.forward.contains_key(&left);
        let right_created = !self.inverse.contains_key(&right);
        let added = self
            .forward
            .entry(left.clone())
            .or_default()
            .insert(right.clone());
        self.inverse.entry(right).or_default().insert(left);
        Insertion {
            added,
            left_created,
            right_created,
        }
    }

    /// Removes the pair `(left, right)` from both sides, dropping any key
    /// whose set becomes empty.
    pub fn remove<Q, S>(&mut self, left: &Q, right: &S) -> Removal
    where
        L: Borrow<Q>,
        R: Borrow<S>,
        Q: Eq + Hash + ?Sized,
        S: Eq + Hash + ?Sized,
    {
        let (removed, left_emptied) = detach(&mut self.forward, left, right);
        let (_, right_emptied) = detach(&mut self.inverse, right, left);
        Removal {
            removed,
            left_emptied,
            right_emptied,
        }
    }

    /// Returns `true` if the pair is present.
    #[must_use]
    pub fn contains<Q, S>(&self, left: &Q, right: &S) -> bool
    where
        L: Borrow<Q>,
        R: Borrow<S>,
        Q: Eq + Hash + ?Sized,
        S: Eq + Hash + ?Sized,
    {
        self.forward.get(left).is_some_and(|set| set.contains(right))
    }

    /// Right keys associated with `left`, in no particular order.
    #[must_use]
    pub fn rights_of<Q>(&self, left: &Q) -> Vec<R>
    where
        L: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.forward
            .get(left)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Left keys associated with `right`, in no particular order.
    #[must_use]
    pub fn lefts_of<S>(&self, right: &S) -> Vec<L>
    where
        R: Borrow<S>,
        S: Eq + Hash + ?Sized,
    {
        self.inverse
            .get(right)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct left keys.
    #[must_use]
    pub fn left_len(&self) -> usize {
        self.forward.len()
    }
}

/// Removes `value` from the set under `key`; drops the key once its set is
/// empty. Returns `(was_present, key_emptied)`.
fn detach<K, V, Q, S>(map: &mut HashMap<K, HashSet<V>>, key: &Q, value: &S) -> (bool, bool)
where
    K: Eq + Hash + Borrow<Q>,
    V: Eq + Hash + Borrow<S>,
    Q: Eq + Hash + ?Sized,
    S: Eq + Hash + ?Sized,
{
    let Some(set) = map.get_mut(key) else {
        return (false, false);
    };
    let was_present = set.remove(value);
    let emptied = set.is_empty();
    if emptied {
        map.remove(key);
    }
    (was_present, emptied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_creates_both_sides() {
        let mut index: BiIndex<&str, u32> = BiIndex::new();
        let ins = index.insert("news", 1);
        assert!(ins.added && ins.left_created && ins.right_created);

        let ins = index.insert("news", 2);
        assert!(ins.added);
        assert!(!ins.left_created);
        assert!(ins.right_created);
    }

    #[test]
    fn duplicate_insert_is_not_added() {
        let mut index: BiIndex<&str, u32> = BiIndex::new();
        index.insert("news", 1);
        let ins = index.insert("news", 1);
        assert!(!ins.added);
        assert_eq!(index.lefts_of(&1), vec!["news"]);
    }

    #[test]
    fn removing_last_pair_drops_both_keys() {
        let mut index: BiIndex<&str, u32> = BiIndex::new();
        index.insert("news", 1);
        index.insert("sport", 1);

        let rm = index.remove(&"news", &1);
        assert!(rm.removed && rm.left_emptied);
        assert!(!rm.right_emptied);
        assert!(index.rights_of(&"news").is_empty());

        let rm = index.remove(&"sport", &1);
        assert!(rm.left_emptied && rm.right_emptied);
        assert_eq!(index.left_len(), 0);
    }

    #[test]
    fn removing_absent_pair_reports_nothing() {
        let mut index: BiIndex<&str, u32> = BiIndex::new();
        index.insert("news", 1);
        let rm = index.remove(&"news", &2);
        assert_eq!(rm, Removal::default());
        assert!(index.contains(&"news", &1));
    }
}
