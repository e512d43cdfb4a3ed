use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::Result;
use crate::record::SessionRecord;

/// Store-side write counter used for optimistic concurrency. Totally
/// ordered per store; a successful write always observes a fresh value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub u64);

/// Precondition for a versioned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// The document must not exist yet.
    Absent,
    /// The document must still be at this version.
    Matches(Version),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored(Version),
    /// The precondition no longer holds; another writer got there first.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Conflict,
    Missing,
}

/// Versioned document contract the lease manager runs against.
///
/// `record.expires_at` doubles as a native-TTL hint for backends that can
/// physically evict on their own; the lease manager's logical expiry check
/// stays authoritative either way. Backend failures map to
/// [`Error::Storage`](crate::Error::Storage) and are never retried here.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, id: &str) -> Result<Option<(SessionRecord, Version)>>;

    async fn put(
        &self,
        id: &str,
        record: &SessionRecord,
        expected: WriteCondition,
    ) -> Result<PutOutcome>;

    async fn delete(&self, id: &str, expected: Version) -> Result<DeleteOutcome>;
}

/// Embedded in-memory store, the default backend for tests and
/// single-process use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: DashMap<String, (SessionRecord, Version)>,
    write_counter: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> Version {
        Version(self.write_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<(SessionRecord, Version)>> {
        Ok(self.documents.get(id).map(|entry| entry.value().clone()))
    }

    async fn put(
        &self,
        id: &str,
        record: &SessionRecord,
        expected: WriteCondition,
    ) -> Result<PutOutcome> {
        match self.documents.entry(id.to_owned()) {
            Entry::Occupied(mut slot) => match expected {
                WriteCondition::Matches(version) if slot.get().1 == version => {
                    let stored = self.next_version();
                    slot.insert((record.clone(), stored));
                    Ok(PutOutcome::Stored(stored))
                }
                _ => Ok(PutOutcome::Conflict),
            },
            Entry::Vacant(slot) => match expected {
                WriteCondition::Absent => {
                    let stored = self.next_version();
                    slot.insert((record.clone(), stored));
                    Ok(PutOutcome::Stored(stored))
                }
                WriteCondition::Matches(_) => Ok(PutOutcome::Conflict),
            },
        }
    }

    async fn delete(&self, id: &str, expected: Version) -> Result<DeleteOutcome> {
        if self
            .documents
            .remove_if(id, |_, (_, version)| *version == expected)
            .is_some()
        {
            Ok(DeleteOutcome::Deleted)
        } else if self.documents.contains_key(id) {
            Ok(DeleteOutcome::Conflict)
        } else {
            Ok(DeleteOutcome::Missing)
        }
    }
}
