//! Support code for exercising lease behavior under storage contention.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::record::SessionRecord;
use crate::storage::{DeleteOutcome, DocumentStore, PutOutcome, Version, WriteCondition};

/// Wraps a store and fails the next n version-checked puts with a
/// conflict, as if another writer kept winning the race. Creates and
/// reads pass straight through.
#[derive(Debug)]
pub struct ConflictStore {
    inner: Arc<dyn DocumentStore>,
    put_conflicts: AtomicU32,
}

impl ConflictStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            put_conflicts: AtomicU32::new(0),
        }
    }

    pub fn fail_next_puts(&self, n: u32) {
        self.put_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_conflict(&self) -> bool {
        self.put_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for ConflictStore {
    async fn get(&self, id: &str) -> Result<Option<(SessionRecord, Version)>> {
        self.inner.get(id).await
    }

    async fn put(
        &self,
        id: &str,
        record: &SessionRecord,
        expected: WriteCondition,
    ) -> Result<PutOutcome> {
        if matches!(expected, WriteCondition::Matches(_)) && self.take_conflict() {
            return Ok(PutOutcome::Conflict);
        }
        self.inner.put(id, record, expected).await
    }

    async fn delete(&self, id: &str, expected: Version) -> Result<DeleteOutcome> {
        self.inner.delete(id, expected).await
    }
}

/// Fresh session id for tests that need distinct keys.
#[must_use]
pub fn fresh_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
