//! Retry cache for reconcile dependency tracking.
//!
//! A reconcile pass that needs another record (a SwitchPort joining a
//! port-channel whose record does not exist yet, a NodeGroup waiting for its
//! pool mapping) parks its key here. When the record appears the constraint
//! is satisfied and the key is handed back to the scheduler.

use std::collections::{HashMap, HashSet};

/// A dependency on a record of another kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    /// Record kind (e.g. "portchannel", "poolmapping")
    pub kind: String,
    /// Record key within the kind
    pub key: String,
}

impl Constraint {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Parses a "kind:key" string.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, key) = s.split_once(':')?;
        if kind.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::new(kind, key))
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Entry in the retry cache.
#[derive(Debug, Clone)]
pub struct RetryEntry<T> {
    pub data: T,
    /// Constraints that must be satisfied before retry
    pub constraints: HashSet<Constraint>,
}

impl<T> RetryEntry<T> {
    pub fn new(data: T, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        Self {
            data,
            constraints: constraints.into_iter().collect(),
        }
    }

    /// Returns true if all constraints are satisfied.
    pub fn is_ready(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn satisfy(&mut self, constraint: &Constraint) -> bool {
        self.constraints.remove(constraint)
    }
}

/// Cache for keys waiting on other records.
#[derive(Debug)]
pub struct RetryCache<K, T> {
    entries: HashMap<K, RetryEntry<T>>,
    /// Reverse index: constraint -> keys waiting on it
    waiters: HashMap<Constraint, HashSet<K>>,
}

impl<K, T> RetryCache<K, T>
where
    K: Eq + std::hash::Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parks a key with its constraints, replacing any previous entry.
    pub fn add(&mut self, key: K, data: T, constraints: impl IntoIterator<Item = Constraint>) {
        self.remove(&key);
        let entry = RetryEntry::new(data, constraints);

        for constraint in &entry.constraints {
            self.waiters
                .entry(constraint.clone())
                .or_default()
                .insert(key.clone());
        }

        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &K) -> Option<T> {
        let entry = self.entries.remove(key)?;
        for constraint in &entry.constraints {
            if let Some(waiters) = self.waiters.get_mut(constraint) {
                waiters.remove(key);
                if waiters.is_empty() {
                    self.waiters.remove(constraint);
                }
            }
        }
        Some(entry.data)
    }

    /// Notifies the cache that a constraint has been satisfied.
    ///
    /// Returns the keys that are now ready to retry.
    pub fn satisfy(&mut self, constraint: &Constraint) -> Vec<K> {
        let mut ready = Vec::new();

        if let Some(waiting_keys) = self.waiters.remove(constraint) {
            for key in waiting_keys {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.satisfy(constraint);
                    if entry.is_ready() {
                        ready.push(key);
                    }
                }
            }
        }

        ready
    }

    /// Removes and returns every entry with no outstanding constraint.
    pub fn drain_ready(&mut self) -> Vec<(K, T)> {
        let ready_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_ready())
            .map(|(k, _)| k.clone())
            .collect();

        ready_keys
            .into_iter()
            .filter_map(|k| self.remove(&k).map(|data| (k, data)))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn constraints(&self, key: &K) -> Option<&HashSet<Constraint>> {
        self.entries.get(key).map(|e| &e.constraints)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.waiters.clear();
    }
}

impl<K, T> Default for RetryCache<K, T>
where
    K: Eq + std::hash::Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint() {
        let c = Constraint::new("portchannel", "po10.leaf1.sdn.test");
        assert_eq!(c.to_string(), "portchannel:po10.leaf1.sdn.test");
        assert_eq!(Constraint::parse("portchannel:po10.leaf1.sdn.test"), Some(c));
        assert_eq!(Constraint::parse("portchannel:"), None);
    }

    #[test]
    fn test_satisfy_constraint() {
        let mut cache: RetryCache<String, ()> = RetryCache::new();
        cache.add(
            "ethernet1.leaf1".to_string(),
            (),
            vec![Constraint::new("portchannel", "po10.leaf1")],
        );

        assert!(cache.drain_ready().is_empty());

        let ready = cache.satisfy(&Constraint::new("portchannel", "po10.leaf1"));
        assert_eq!(ready, vec!["ethernet1.leaf1".to_string()]);

        let drained = cache.drain_ready();
        assert_eq!(drained.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_multiple_constraints() {
        let mut cache: RetryCache<String, ()> = RetryCache::new();
        cache.add(
            "group-a".to_string(),
            (),
            vec![
                Constraint::new("poolmapping", "group-a"),
                Constraint::new("pool", "general"),
            ],
        );

        assert!(cache
            .satisfy(&Constraint::new("poolmapping", "group-a"))
            .is_empty());
        assert_eq!(cache.satisfy(&Constraint::new("pool", "general")).len(), 1);
    }

    #[test]
    fn test_re_add_replaces_constraints() {
        let mut cache: RetryCache<String, ()> = RetryCache::new();
        cache.add("k".to_string(), (), vec![Constraint::new("a", "1")]);
        cache.add("k".to_string(), (), vec![Constraint::new("b", "2")]);

        assert!(cache.satisfy(&Constraint::new("a", "1")).is_empty());
        assert_eq!(cache.satisfy(&Constraint::new("b", "2")), vec!["k".to_string()]);
    }

    #[test]
    fn test_remove() {
        let mut cache: RetryCache<String, u32> = RetryCache::new();
        cache.add("k".to_string(), 7, vec![Constraint::new("a", "1")]);

        assert_eq!(cache.remove(&"k".to_string()), Some(7));
        assert!(cache.is_empty());
        assert!(cache.satisfy(&Constraint::new("a", "1")).is_empty());
    }
}
