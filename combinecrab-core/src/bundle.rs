//! Per-instance key → accumulator map awaiting the next flush.

use std::hash::Hash;

use ahash::AHashMap;
use anyhow::Result;

/// In-memory bundle of partially merged accumulators.
///
/// Owned by exactly one operator instance and touched only by its record
/// path, so it carries no synchronisation. It is unbounded between flushes.
///
/// # Invariant
/// After N inputs with key K since the last [`clear`](Self::clear), the bundle
/// holds exactly one entry for K: the fold of those N inputs in arrival order.
#[derive(Debug, Clone)]
pub struct Bundle<K, V> {
    entries: AHashMap<K, V>,
}

impl<K, V> Bundle<K, V>
where
    K: Eq + Hash,
{
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    /// Merge a new input into the accumulator stored under `key`.
    ///
    /// `merge` receives the current accumulator (or `None` for an unseen key)
    /// and returns the replacement. If `merge` fails, the entry for `key` is
    /// gone: the caller is expected to fail the task.
    pub fn merge<F>(&mut self, key: K, merge: F) -> Result<()>
    where
        F: FnOnce(Option<V>) -> Result<V>,
    {
        let current = self.entries.remove(&key);
        let merged = merge(current)?;
        self.entries.insert(key, merged);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys currently buffered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(key, accumulator)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Drop every buffered accumulator, keeping the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K, V> Default for Bundle<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, K, V> IntoIterator for &'a Bundle<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = std::collections::hash_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(acc: Option<i64>, value: i64) -> Result<i64> {
        Ok(acc.unwrap_or(0) + value)
    }

    #[test]
    fn test_merge_creates_and_folds_entries() {
        let mut bundle = Bundle::new();
        bundle.merge("a", |acc| add(acc, 1)).unwrap();
        bundle.merge("a", |acc| add(acc, 2)).unwrap();
        bundle.merge("b", |acc| add(acc, 10)).unwrap();

        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.get(&"a"), Some(&3));
        assert_eq!(bundle.get(&"b"), Some(&10));
    }

    #[test]
    fn test_merge_sees_absent_accumulator_for_new_key() {
        let mut bundle: Bundle<&str, Vec<i32>> = Bundle::new();
        bundle
            .merge("k", |acc| {
                assert!(acc.is_none());
                Ok(vec![1])
            })
            .unwrap();
        bundle
            .merge("k", |acc| {
                let mut values = acc.expect("existing accumulator");
                values.push(2);
                Ok(values)
            })
            .unwrap();
        assert_eq!(bundle.get(&"k"), Some(&vec![1, 2]));
    }

    #[test]
    fn test_failed_merge_propagates() {
        let mut bundle: Bundle<&str, i64> = Bundle::new();
        let result = bundle.merge("k", |_| Err(anyhow::anyhow!("bad input")));
        assert!(result.is_err());
        assert!(!bundle.contains_key(&"k"));
    }

    #[test]
    fn test_clear_empties_bundle() {
        let mut bundle = Bundle::new();
        bundle.merge(1u32, |acc| add(acc, 5)).unwrap();
        assert!(!bundle.is_empty());
        bundle.clear();
        assert!(bundle.is_empty());
        assert_eq!(bundle.iter().count(), 0);
    }
}
