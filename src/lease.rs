// Lease manager - exclusive acquisition, release, commit, and lazy expiry

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::codec::SessionItems;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::record::{InitFlag, SessionRecord};
use crate::storage::{DeleteOutcome, DocumentStore, PutOutcome, Version, WriteCondition};

/// Outcome of an exclusive or peek read.
#[derive(Debug)]
pub enum SessionRead {
    /// No live record for the key.
    Absent,
    /// Another caller holds the lease. Nothing was mutated; the caller
    /// decides whether and when to poll again.
    Held { lock_token: u64, lock_age: Duration },
    /// The record's content, with the token the caller presents back on
    /// release or commit.
    Granted {
        items: SessionItems,
        lock_token: u64,
        init_flag: InitFlag,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Committed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Refreshed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    Skipped,
}

/// Coordinates exclusive access to session records against an injected
/// [`DocumentStore`].
///
/// There is no in-process mutex per key: two callers may both read an
/// unlocked record and both try to lock it, and the store's version check
/// decides the winner. The loser re-runs its sequence from a fresh read,
/// bounded by [`SessionConfig::retries_on_conflict`].
#[derive(Debug)]
pub struct LeaseManager {
    store: Arc<dyn DocumentStore>,
    config: SessionConfig,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn DocumentStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn document_id(&self, session_id: &str) -> String {
        SessionRecord::document_id(&self.config.application, session_id)
    }

    /// Read a session and take its exclusive lease.
    ///
    /// Locks the record, bumps the token, and stamps the acquisition time.
    /// A record held by another caller comes back as [`SessionRead::Held`]
    /// immediately; there is no waiting. Lost write races retry from a
    /// fresh read with no backoff, and exhausting the bound surfaces
    /// [`Error::ConcurrencyExhausted`].
    pub async fn acquire_exclusive(&self, session_id: &str) -> Result<SessionRead> {
        let id = self.document_id(session_id);
        debug!(session_id, "acquiring exclusive lease");

        for _ in 0..=self.config.retries_on_conflict {
            let now = Utc::now();
            let Some((mut record, version)) = self.store.get(&id).await? else {
                debug!(session_id, "no session record");
                return Ok(SessionRead::Absent);
            };
            if record.is_expired(now) {
                self.sweep(session_id, &id, version).await?;
                return Ok(SessionRead::Absent);
            }
            if record.locked {
                let lock_age = record.lock_age(now);
                debug!(session_id, lock_token = record.lock_token, "lease already held");
                return Ok(SessionRead::Held {
                    lock_token: record.lock_token,
                    lock_age,
                });
            }

            record.lock(now);
            match self
                .store
                .put(&id, &record, WriteCondition::Matches(version))
                .await?
            {
                PutOutcome::Stored(_) => {
                    debug!(session_id, lock_token = record.lock_token, "lease granted");
                    return granted(record);
                }
                PutOutcome::Conflict => {
                    debug!(session_id, "lost the lock race, re-reading");
                }
            }
        }

        Err(Error::ConcurrencyExhausted {
            session_id: session_id.to_owned(),
            attempts: self.config.retries_on_conflict + 1,
        })
    }

    /// Read a session without taking or checking the lease.
    ///
    /// Existence and expiry are handled exactly like the exclusive path;
    /// beyond that the current content is returned as-is, locked or not,
    /// and nothing is mutated.
    pub async fn peek(&self, session_id: &str) -> Result<SessionRead> {
        let id = self.document_id(session_id);
        debug!(session_id, "peeking session");

        let now = Utc::now();
        let Some((record, version)) = self.store.get(&id).await? else {
            return Ok(SessionRead::Absent);
        };
        if record.is_expired(now) {
            self.sweep(session_id, &id, version).await?;
            return Ok(SessionRead::Absent);
        }
        granted(record)
    }

    /// Drop the lease without writing new content.
    ///
    /// A missing record or a token that no longer matches means a newer
    /// holder owns the key; the release is skipped rather than clobbering
    /// their state.
    pub async fn release(&self, session_id: &str, lock_token: u64) -> Result<Release> {
        let id = self.document_id(session_id);
        debug!(session_id, lock_token, "releasing lease");

        for _ in 0..=self.config.retries_on_conflict {
            let now = Utc::now();
            let Some((mut record, version)) = self.store.get(&id).await? else {
                return Ok(Release::Skipped);
            };
            if record.lock_token != lock_token {
                debug!(
                    session_id,
                    stored = record.lock_token,
                    presented = lock_token,
                    "stale lease token, leaving record untouched"
                );
                return Ok(Release::Skipped);
            }

            record.unlock();
            record.expires_at = now + self.config.timeout;
            match self
                .store
                .put(&id, &record, WriteCondition::Matches(version))
                .await?
            {
                PutOutcome::Stored(_) => return Ok(Release::Released),
                PutOutcome::Conflict => {
                    debug!(session_id, "release raced another writer, re-reading");
                }
            }
        }

        warn!(session_id, "release gave up after repeated conflicts");
        Ok(Release::Skipped)
    }

    /// Write new content and drop the lease in one step.
    ///
    /// With `is_new` the record is created, or an expired record occupying
    /// the key is replaced in place; either way the token restarts at the
    /// baseline because the old lifetime of the key is over. A live record
    /// already at the key skips the create. Without `is_new` the token is
    /// checked like [`release`](Self::release).
    pub async fn commit_and_release(
        &self,
        session_id: &str,
        lock_token: u64,
        items: &SessionItems,
        is_new: bool,
    ) -> Result<Commit> {
        let id = self.document_id(session_id);
        debug!(session_id, lock_token, is_new, "committing session");
        let payload = items.encode()?;

        for _ in 0..=self.config.retries_on_conflict {
            let now = Utc::now();
            let expires_at = now + self.config.timeout;

            let outcome = if is_new {
                match self.store.get(&id).await? {
                    None => {
                        let mut record =
                            SessionRecord::new(session_id, &self.config.application, now, expires_at);
                        record.payload.clone_from(&payload);
                        self.store.put(&id, &record, WriteCondition::Absent).await?
                    }
                    Some((old, version)) if old.is_expired(now) => {
                        let mut record =
                            SessionRecord::new(session_id, &self.config.application, now, expires_at);
                        record.payload.clone_from(&payload);
                        self.store
                            .put(&id, &record, WriteCondition::Matches(version))
                            .await?
                    }
                    Some(_) => {
                        warn!(session_id, "create requested but a live session exists");
                        return Ok(Commit::Skipped);
                    }
                }
            } else {
                let Some((mut record, version)) = self.store.get(&id).await? else {
                    return Ok(Commit::Skipped);
                };
                if record.lock_token != lock_token {
                    debug!(
                        session_id,
                        stored = record.lock_token,
                        presented = lock_token,
                        "stale lease token, leaving record untouched"
                    );
                    return Ok(Commit::Skipped);
                }
                record.payload.clone_from(&payload);
                record.unlock();
                record.expires_at = expires_at;
                record.init_flag = InitFlag::Normal;
                self.store
                    .put(&id, &record, WriteCondition::Matches(version))
                    .await?
            };

            match outcome {
                PutOutcome::Stored(_) => {
                    debug!(session_id, "session committed");
                    return Ok(Commit::Committed);
                }
                PutOutcome::Conflict => {
                    debug!(session_id, "commit raced another writer, re-reading");
                }
            }
        }

        warn!(session_id, "commit gave up after repeated conflicts");
        Ok(Commit::Skipped)
    }

    /// Push the expiry out without touching the lock state.
    ///
    /// Best-effort: a lost write race is swallowed, because whoever won it
    /// wrote a fresh expiry of their own and the caller must never block
    /// on this.
    pub async fn refresh_expiry(&self, session_id: &str) -> Result<Refresh> {
        let id = self.document_id(session_id);
        debug!(session_id, "refreshing expiry");

        let now = Utc::now();
        let Some((mut record, version)) = self.store.get(&id).await? else {
            return Ok(Refresh::NotFound);
        };

        record.expires_at = now + self.config.timeout;
        match self
            .store
            .put(&id, &record, WriteCondition::Matches(version))
            .await?
        {
            PutOutcome::Stored(_) => {}
            PutOutcome::Conflict => {
                warn!(session_id, "expiry refresh lost a write race, keeping the winner's record");
            }
        }
        Ok(Refresh::Refreshed)
    }

    /// Delete the record, but only while the caller still owns it.
    pub async fn remove_if_owned(&self, session_id: &str, lock_token: u64) -> Result<Removal> {
        let id = self.document_id(session_id);
        debug!(session_id, lock_token, "removing session");

        for _ in 0..=self.config.retries_on_conflict {
            let Some((record, version)) = self.store.get(&id).await? else {
                return Ok(Removal::Skipped);
            };
            if record.lock_token != lock_token {
                debug!(
                    session_id,
                    stored = record.lock_token,
                    presented = lock_token,
                    "stale lease token, leaving record in place"
                );
                return Ok(Removal::Skipped);
            }

            match self.store.delete(&id, version).await? {
                DeleteOutcome::Deleted => {
                    debug!(session_id, "session removed");
                    return Ok(Removal::Removed);
                }
                DeleteOutcome::Missing => return Ok(Removal::Skipped),
                DeleteOutcome::Conflict => {
                    debug!(session_id, "remove raced another writer, re-reading");
                }
            }
        }

        warn!(session_id, "remove gave up after repeated conflicts");
        Ok(Removal::Skipped)
    }

    /// Store an uninitialized record ahead of the session's first write.
    ///
    /// The record is unlocked, carries the supplied timeout, and decodes
    /// to the empty item collection until the first commit. A create that
    /// finds the id already taken is swallowed; a record exists either way.
    pub async fn create_placeholder(&self, session_id: &str, timeout: Duration) -> Result<()> {
        let id = self.document_id(session_id);
        debug!(session_id, "creating uninitialized session");

        let now = Utc::now();
        let record =
            SessionRecord::placeholder(session_id, &self.config.application, now, now + timeout);
        match self.store.put(&id, &record, WriteCondition::Absent).await? {
            PutOutcome::Stored(_) => {}
            PutOutcome::Conflict => {
                warn!(session_id, "placeholder already present");
            }
        }
        Ok(())
    }

    /// Lazy eviction of a record whose expiry has passed. A conflict or a
    /// missing document means another reader got there first; every reader
    /// converges on absent.
    async fn sweep(&self, session_id: &str, id: &str, version: Version) -> Result<()> {
        match self.store.delete(id, version).await? {
            DeleteOutcome::Deleted => debug!(session_id, "evicted expired session"),
            DeleteOutcome::Conflict | DeleteOutcome::Missing => {
                debug!(session_id, "expired session already evicted or rewritten");
            }
        }
        Ok(())
    }
}

/// A placeholder decodes to the empty collection without consulting the
/// payload; everything else goes through the codec.
fn granted(record: SessionRecord) -> Result<SessionRead> {
    let items = match record.init_flag {
        InitFlag::NeedsInitialization => SessionItems::new(),
        InitFlag::Normal => SessionItems::decode(&record.payload)?,
    };
    Ok(SessionRead::Granted {
        items,
        lock_token: record.lock_token,
        init_flag: record.init_flag,
    })
}
