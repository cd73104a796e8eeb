//! Tracked file registry.
//!
//! A small set of `(path, protected)` entries keyed by case-insensitive
//! canonical path. Slots are reserved up front so the locked section of
//! [`TrackedFileRegistry::add`] never allocates, and removed entries are
//! dropped only after the lock is released.

use crate::canonical::{eq_ignore_case, CanonicalPath};
use crate::context::{ExecContext, Passive};
use crate::error::TrackerError;
use crate::sync::SpinLock;
use tracing::warn;

struct TrackedFileEntry {
    path: String,
    protected: bool,
}

/// Copy of an entry's protection flag handed out by [`TrackedFileRegistry::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub protected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyTracked,
    ResourceExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

pub struct TrackedFileRegistry {
    entries: SpinLock<Vec<TrackedFileEntry>>,
    max_entries: usize,
}

impl TrackedFileRegistry {
    pub fn with_capacity(max_entries: usize) -> Result<Self, TrackerError> {
        if max_entries == 0 {
            return Err(TrackerError::InvalidConfig(
                "registry capacity must be at least 1".into(),
            ));
        }
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(max_entries)
            .map_err(|_| TrackerError::Allocation("tracked file slots"))?;
        Ok(Self {
            entries: SpinLock::new(entries),
            max_entries,
        })
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Start tracking `path`. Duplicates (case-insensitive) are rejected
    /// without touching the existing entry.
    pub fn add(&self, _cx: &Passive, path: &CanonicalPath, protected: bool) -> AddOutcome {
        let mut owned = String::new();
        if owned.try_reserve_exact(path.len()).is_err() {
            return AddOutcome::ResourceExhausted;
        }
        owned.push_str(path.as_str());
        let entry = TrackedFileEntry {
            path: owned,
            protected,
        };

        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|e| eq_ignore_case(&e.path, path.as_str()))
        {
            return AddOutcome::AlreadyTracked;
        }
        // Never grow the vector under the lock.
        if entries.len() >= self.max_entries || entries.len() == entries.capacity() {
            return AddOutcome::ResourceExhausted;
        }
        entries.push(entry);
        AddOutcome::Added
    }

    pub fn remove(&self, _cx: &impl ExecContext, path: &CanonicalPath) -> RemoveOutcome {
        let removed = {
            let mut entries = self.entries.lock();
            entries
                .iter()
                .position(|e| eq_ignore_case(&e.path, path.as_str()))
                .map(|i| entries.swap_remove(i))
        };
        match removed {
            Some(_entry) => RemoveOutcome::Removed,
            None => RemoveOutcome::NotFound,
        }
    }

    pub fn lookup(&self, _cx: &impl ExecContext, path: &CanonicalPath) -> Option<Protection> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| eq_ignore_case(&e.path, path.as_str()))
            .map(|e| Protection {
                protected: e.protected,
            })
    }

    pub fn len(&self, _cx: &impl ExecContext) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self, cx: &impl ExecContext) -> bool {
        self.len(cx) == 0
    }

    /// Release every entry. Returns how many were dropped.
    pub fn clear(&self, _cx: &Passive) -> usize {
        let mut fresh = Vec::new();
        if fresh.try_reserve_exact(self.max_entries).is_err() {
            warn!(
                max_entries = self.max_entries,
                "could not reserve tracked file slots after clear; adds will report ResourceExhausted"
            );
        }
        let old = {
            let mut entries = self.entries.lock();
            std::mem::replace(&mut *entries, fresh)
        };
        old.len()
    }

    #[cfg(test)]
    fn paths(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.path.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{canonicalize, simple_uppercase};
    use crate::context::Restricted;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    fn p(s: &str) -> CanonicalPath {
        canonicalize(s).unwrap()
    }

    #[test]
    fn add_then_lookup_returns_flag() {
        let reg = TrackedFileRegistry::with_capacity(8).unwrap();
        Passive::enter(|cx| {
            assert_eq!(reg.add(cx, &p("/watched/a.txt"), true), AddOutcome::Added);
            assert_eq!(reg.add(cx, &p("/watched/b.txt"), false), AddOutcome::Added);
            assert_eq!(
                reg.lookup(cx, &p("/WATCHED/A.txt")),
                Some(Protection { protected: true })
            );
            assert_eq!(
                reg.lookup(cx, &p("/watched/b.txt")),
                Some(Protection { protected: false })
            );
            assert_eq!(reg.lookup(cx, &p("/watched/c.txt")), None);
        });
    }

    #[test]
    fn duplicate_add_keeps_original_flag() {
        let reg = TrackedFileRegistry::with_capacity(8).unwrap();
        Passive::enter(|cx| {
            reg.add(cx, &p("/w/a"), false);
            assert_eq!(reg.add(cx, &p("/W/A"), true), AddOutcome::AlreadyTracked);
            assert_eq!(reg.len(cx), 1);
            assert_eq!(reg.lookup(cx, &p("/w/a")), Some(Protection { protected: false }));
        });
    }

    #[test]
    fn remove_missing_is_not_found_and_harmless() {
        let reg = TrackedFileRegistry::with_capacity(4).unwrap();
        Passive::enter(|cx| {
            reg.add(cx, &p("/w/a"), true);
            assert_eq!(reg.remove(cx, &p("/w/b")), RemoveOutcome::NotFound);
            assert_eq!(reg.paths(), vec!["/w/a".to_string()]);
            assert_eq!(reg.remove(cx, &p("/w/A")), RemoveOutcome::Removed);
            assert_eq!(reg.lookup(cx, &p("/w/a")), None);
            assert_eq!(reg.remove(cx, &p("/w/a")), RemoveOutcome::NotFound);
        });
    }

    #[test]
    fn full_registry_is_exhausted_and_unchanged() {
        let reg = TrackedFileRegistry::with_capacity(2).unwrap();
        Passive::enter(|cx| {
            reg.add(cx, &p("/a"), false);
            reg.add(cx, &p("/b"), false);
            assert_eq!(reg.add(cx, &p("/c"), true), AddOutcome::ResourceExhausted);
            assert_eq!(reg.len(cx), 2);
            assert_eq!(reg.lookup(cx, &p("/c")), None);
            reg.remove(cx, &p("/a"));
            assert_eq!(reg.add(cx, &p("/c"), true), AddOutcome::Added);
        });
    }

    #[test]
    fn clear_releases_everything_and_keeps_slots() {
        let reg = TrackedFileRegistry::with_capacity(3).unwrap();
        Passive::enter(|cx| {
            reg.add(cx, &p("/a"), false);
            reg.add(cx, &p("/b"), true);
            assert_eq!(reg.clear(cx), 2);
            assert!(reg.is_empty(cx));
            assert_eq!(reg.add(cx, &p("/a"), true), AddOutcome::Added);
        });
    }

    #[test]
    fn clear_without_slots_leaves_adds_exhausted() {
        let reg = TrackedFileRegistry {
            entries: SpinLock::new(Vec::new()),
            max_entries: usize::MAX,
        };
        Passive::enter(|cx| {
            assert_eq!(reg.clear(cx), 0);
            assert!(reg.is_empty(cx));
            assert_eq!(
                reg.add(cx, &p("/a"), false),
                AddOutcome::ResourceExhausted
            );
        });
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            TrackedFileRegistry::with_capacity(0),
            Err(TrackerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn lookup_and_remove_work_from_restricted_context() {
        let reg = TrackedFileRegistry::with_capacity(2).unwrap();
        Passive::enter(|cx| reg.add(cx, &p("/a"), true));
        Restricted::enter(|cx| {
            assert!(reg.lookup(cx, &p("/a")).is_some());
            assert_eq!(reg.remove(cx, &p("/a")), RemoveOutcome::Removed);
        });
    }

    #[test]
    fn concurrent_lookups_never_see_torn_entries() {
        let reg = Arc::new(TrackedFileRegistry::with_capacity(64).unwrap());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let reg = reg.clone();
                thread::spawn(move || {
                    let path = p(&format!("/w/file{t}"));
                    for i in 0..2_000 {
                        Passive::enter(|cx| {
                            reg.add(cx, &path, i % 2 == 0);
                            reg.remove(cx, &path);
                        });
                    }
                })
            })
            .collect();
        let reader = {
            let reg = reg.clone();
            thread::spawn(move || {
                let stable = p("/w/stable");
                Passive::enter(|cx| reg.add(cx, &stable, true));
                for _ in 0..10_000 {
                    let seen = Restricted::enter(|cx| reg.lookup(cx, &stable));
                    assert_eq!(seen, Some(Protection { protected: true }));
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        Passive::enter(|cx| assert_eq!(reg.len(cx), 1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, bool, bool),
        Remove(usize, bool),
    }

    const NAMES: [&str; 10] = [
        "/w/a.txt",
        "/w/b.txt",
        "/w/sub/c.txt",
        "/w/d",
        "/w/straße",
        "/w/strasse",
        "/w/ﬁle",
        "/w/file",
        "/w/ärger",
        "/w/Ärger",
    ];

    fn fold(name: &str) -> String {
        name.chars().map(simple_uppercase).collect()
    }

    fn spelled(i: usize, upper: bool) -> CanonicalPath {
        let name = NAMES[i];
        if upper {
            p(&fold(name))
        } else {
            p(name)
        }
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..NAMES.len(), any::<bool>(), any::<bool>()).prop_map(|(i, u, pr)| Op::Add(i, u, pr)),
            (0..NAMES.len(), any::<bool>()).prop_map(|(i, u)| Op::Remove(i, u)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Whatever the mix of adds and removes, the registry agrees with a
        /// map keyed by the folded name and never holds two equal paths.
        #[test]
        fn prop_registry_matches_model(ops in prop::collection::vec(arb_op(), 0..64)) {
            let reg = TrackedFileRegistry::with_capacity(NAMES.len()).unwrap();
            let mut model: HashMap<String, bool> = HashMap::new();
            Passive::enter(|cx| {
                for op in &ops {
                    match *op {
                        Op::Add(i, upper, protected) => {
                            let outcome = reg.add(cx, &spelled(i, upper), protected);
                            if let std::collections::hash_map::Entry::Vacant(v) =
                                model.entry(fold(NAMES[i]))
                            {
                                v.insert(protected);
                                prop_assert_eq!(outcome, AddOutcome::Added);
                            } else {
                                prop_assert_eq!(outcome, AddOutcome::AlreadyTracked);
                            }
                        }
                        Op::Remove(i, upper) => {
                            let outcome = reg.remove(cx, &spelled(i, upper));
                            if model.remove(&fold(NAMES[i])).is_some() {
                                prop_assert_eq!(outcome, RemoveOutcome::Removed);
                            } else {
                                prop_assert_eq!(outcome, RemoveOutcome::NotFound);
                            }
                        }
                    }
                    let mut keys: Vec<String> = reg.paths().iter().map(|s| fold(s)).collect();
                    let total = keys.len();
                    keys.sort();
                    keys.dedup();
                    prop_assert_eq!(keys.len(), total);
                    prop_assert_eq!(total, model.len());
                }
                for name in NAMES.iter().copied() {
                    let expected = model.get(&fold(name)).map(|&protected| Protection { protected });
                    prop_assert_eq!(reg.lookup(cx, &p(name)), expected);
                }
                Ok(())
            })?;
        }
    }
}
