use commonware_utils::hex;
use keel_types::{
    state::{MAX_KEY_LEN, MAX_VALUE_LEN},
    ChangeSet, Key, Status, Value,
};
use std::{collections::BTreeMap, future::Future};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot apply mutation of key {key}: {reason}")]
    Apply { key: String, reason: &'static str },
    #[error("branch is inconsistent: {reason}")]
    Inconsistent { reason: &'static str },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Read-only view of chain state.
pub trait ReadonlyStore {
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>, StoreError>>;
}

fn check(key: &Key, status: &Status) -> Result<(), StoreError> {
    let reason = if key.is_empty() {
        "empty key"
    } else if key.len() > MAX_KEY_LEN {
        "key too long"
    } else if matches!(status, Status::Update(value) if value.len() > MAX_VALUE_LEN) {
        "value too long"
    } else {
        return Ok(());
    };
    Err(StoreError::Apply {
        key: hex(&key.as_bytes()[..key.len().min(32)]),
        reason,
    })
}

/// Copy-on-write overlay over a parent store.
///
/// Mutations are appended to an ordered log and are visible only through this branch. The parent
/// is never written: a branch's effects reach the parent only when the owner of the parent pulls
/// [BranchStore::change_sets] and applies them.
pub struct BranchStore<'a, S: ReadonlyStore> {
    parent: &'a S,
    log: Vec<(Key, Status)>,
    latest: BTreeMap<Key, usize>,
}

impl<'a, S: ReadonlyStore> BranchStore<'a, S> {
    pub fn branch(parent: &'a S) -> Self {
        Self {
            parent,
            log: Vec::new(),
            latest: BTreeMap::new(),
        }
    }

    pub fn parent(&self) -> &'a S {
        self.parent
    }

    /// Number of staged mutations.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    fn stage(&mut self, key: Key, status: Status) {
        self.latest.insert(key.clone(), self.log.len());
        self.log.push((key, status));
    }

    pub fn insert(&mut self, key: Key, value: Value) -> Result<(), StoreError> {
        let status = Status::Update(value);
        check(&key, &status)?;
        self.stage(key, status);
        Ok(())
    }

    pub fn delete(&mut self, key: Key) -> Result<(), StoreError> {
        check(&key, &Status::Delete)?;
        self.stage(key, Status::Delete);
        Ok(())
    }

    /// Merge change sets into this branch in the order supplied.
    ///
    /// Every entry is checked before any is staged, so a rejected merge leaves the branch as it
    /// was.
    pub fn apply_change_sets(
        &mut self,
        change_sets: impl IntoIterator<Item = ChangeSet>,
    ) -> Result<(), StoreError> {
        let change_sets: Vec<ChangeSet> = change_sets.into_iter().collect();
        for (key, status) in change_sets.iter().flat_map(ChangeSet::iter) {
            check(key, status)?;
        }
        for (key, status) in change_sets.into_iter().flatten() {
            self.stage(key, status);
        }
        Ok(())
    }

    /// Everything staged since the branch was created, in staging order.
    pub fn change_sets(&self) -> Result<ChangeSet, StoreError> {
        self.verify()?;
        Ok(self.log.iter().cloned().collect())
    }

    /// Consume the branch and return its staged mutations.
    pub fn into_change_set(self) -> Result<ChangeSet, StoreError> {
        self.verify()?;
        Ok(self.log.into_iter().collect())
    }

    fn verify(&self) -> Result<(), StoreError> {
        if self.latest.len() > self.log.len() {
            return Err(StoreError::Inconsistent {
                reason: "more indexed keys than staged mutations",
            });
        }
        for (key, &index) in &self.latest {
            match self.log.get(index) {
                Some((staged, _)) if staged == key => {}
                _ => {
                    return Err(StoreError::Inconsistent {
                        reason: "index does not match log",
                    })
                }
            }
        }
        Ok(())
    }

    fn staged(&self, key: &Key) -> Result<Option<&Status>, StoreError> {
        let Some(&index) = self.latest.get(key) else {
            return Ok(None);
        };
        match self.log.get(index) {
            Some((staged, status)) if staged == key => Ok(Some(status)),
            _ => Err(StoreError::Inconsistent {
                reason: "index does not match log",
            }),
        }
    }
}

impl<S: ReadonlyStore> ReadonlyStore for BranchStore<'_, S> {
    async fn get(&self, key: &Key) -> Result<Option<Value>, StoreError> {
        Ok(match self.staged(key)? {
            Some(Status::Update(value)) => Some(value.clone()),
            Some(Status::Delete) => None,
            None => self.parent.get(key).await?,
        })
    }
}

/// In-memory committed state for tests and examples.
#[cfg(any(test, feature = "mocks"))]
#[derive(Clone, Debug, Default)]
pub struct Memory {
    state: BTreeMap<Key, Value>,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    pub fn insert(&mut self, key: Key, value: Value) {
        self.state.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Commit a change set.
    pub fn apply(&mut self, changes: ChangeSet) {
        for (key, status) in changes {
            match status {
                Status::Update(value) => {
                    self.state.insert(key, value);
                }
                Status::Delete => {
                    self.state.remove(&key);
                }
            }
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
impl ReadonlyStore for Memory {
    async fn get(&self, key: &Key) -> Result<Option<Value>, StoreError> {
        Ok(self.state.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_runtime::{deterministic::Runner, Runner as _};

    fn value(bytes: &[u8]) -> Value {
        Value::from(bytes)
    }

    fn base() -> Memory {
        let mut memory = Memory::default();
        memory.insert(Key::from("a"), value(b"1"));
        memory.insert(Key::from("b"), value(b"2"));
        memory
    }

    #[test]
    fn branch_reads_through_and_shadows() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let memory = base();
            let mut branch = BranchStore::branch(&memory);
            branch.insert(Key::from("a"), value(b"10")).unwrap();
            branch.delete(Key::from("b")).unwrap();
            branch.insert(Key::from("c"), value(b"3")).unwrap();

            assert_eq!(branch.get(&Key::from("a")).await.unwrap(), Some(value(b"10")));
            assert_eq!(branch.get(&Key::from("b")).await.unwrap(), None);
            assert_eq!(branch.get(&Key::from("c")).await.unwrap(), Some(value(b"3")));

            // Parent untouched.
            assert_eq!(memory.get(&Key::from("a")).await.unwrap(), Some(value(b"1")));
            assert_eq!(memory.get(&Key::from("b")).await.unwrap(), Some(value(b"2")));
            assert_eq!(memory.get(&Key::from("c")).await.unwrap(), None);
        });
    }

    #[test]
    fn change_sets_preserve_order_without_draining() {
        let memory = Memory::default();
        let mut branch = BranchStore::branch(&memory);
        branch.insert(Key::from("z"), value(b"1")).unwrap();
        branch.insert(Key::from("a"), value(b"2")).unwrap();
        branch.delete(Key::from("z")).unwrap();

        let first = branch.change_sets().unwrap();
        let second = branch.change_sets().unwrap();
        assert_eq!(first, second);
        let keys: Vec<_> = first.iter().map(|(key, _)| key.clone()).collect();
        assert_eq!(keys, vec![Key::from("z"), Key::from("a"), Key::from("z")]);
        assert_eq!(branch.len(), 3);
    }

    #[test]
    fn nested_branch_merges_into_parent_only() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let memory = base();
            let mut outer = BranchStore::branch(&memory);
            outer.insert(Key::from("x"), value(b"outer")).unwrap();

            let changes = {
                let mut inner = BranchStore::branch(&outer);
                assert_eq!(
                    inner.get(&Key::from("x")).await.unwrap(),
                    Some(value(b"outer"))
                );
                inner.insert(Key::from("x"), value(b"inner")).unwrap();
                inner.delete(Key::from("a")).unwrap();
                assert_eq!(outer.get(&Key::from("x")).await.unwrap(), Some(value(b"outer")));
                inner.change_sets().unwrap()
            };

            outer.apply_change_sets([changes]).unwrap();
            assert_eq!(outer.get(&Key::from("x")).await.unwrap(), Some(value(b"inner")));
            assert_eq!(outer.get(&Key::from("a")).await.unwrap(), None);
            assert_eq!(memory.get(&Key::from("a")).await.unwrap(), Some(value(b"1")));
        });
    }

    #[test]
    fn apply_is_all_or_nothing() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let memory = Memory::default();
            let mut branch = BranchStore::branch(&memory);

            let good: ChangeSet = [(Key::from("ok"), Status::Update(value(b"v")))]
                .into_iter()
                .collect();
            let bad: ChangeSet = [
                (Key::from("also-ok"), Status::Delete),
                (Key::new(Vec::new()), Status::Delete),
            ]
            .into_iter()
            .collect();

            let err = branch.apply_change_sets([good, bad]).unwrap_err();
            assert!(matches!(err, StoreError::Apply { reason: "empty key", .. }));
            assert!(branch.is_empty());
            assert_eq!(branch.get(&Key::from("ok")).await.unwrap(), None);
        });
    }

    #[test]
    fn rejects_oversized_entries() {
        let memory = Memory::default();
        let mut branch = BranchStore::branch(&memory);
        let long_key = Key::new(vec![7u8; MAX_KEY_LEN + 1]);
        assert!(matches!(
            branch.delete(long_key),
            Err(StoreError::Apply {
                reason: "key too long",
                ..
            })
        ));
        let big_value = Value::new(vec![0u8; MAX_VALUE_LEN + 1]);
        assert!(matches!(
            branch.insert(Key::from("k"), big_value),
            Err(StoreError::Apply {
                reason: "value too long",
                ..
            })
        ));
        assert!(branch.is_empty());
    }

    #[test]
    fn memory_commits_branch() {
        let executor = Runner::default();
        executor.start(|_| async move {
            let mut memory = base();
            let changes = {
                let mut branch = BranchStore::branch(&memory);
                branch.insert(Key::from("a"), value(b"9")).unwrap();
                branch.delete(Key::from("b")).unwrap();
                branch.into_change_set().unwrap()
            };
            memory.apply(changes);
            assert_eq!(memory.get(&Key::from("a")).await.unwrap(), Some(value(b"9")));
            assert_eq!(memory.get(&Key::from("b")).await.unwrap(), None);
            assert_eq!(memory.len(), 1);
        });
    }
}
