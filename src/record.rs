// Session record - the persisted document and its lock/expiry transitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lock token a freshly created record starts from. The first successful
/// acquire bumps it to 1.
pub const BASELINE_LOCK_TOKEN: u64 = 0;

/// Marks a record that was created ahead of the session's first real write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitFlag {
    #[default]
    Normal,
    NeedsInitialization,
}

/// One persisted session.
///
/// The record is the only shared mutable state per key. `locked` plus
/// `lock_token` carry the advisory lease; the store's version check on
/// write is what actually arbitrates racing writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub application: String,
    /// Set once at creation, immutable afterwards.
    pub created_at: DateTime<Utc>,
    /// The record is logically dead once `now > expires_at`.
    pub expires_at: DateTime<Utc>,
    pub locked: bool,
    /// Monotonically increasing within one lifetime of the key; the
    /// holder's proof of ownership on release and commit.
    pub lock_token: u64,
    pub lock_acquired_at: Option<DateTime<Utc>>,
    /// Opaque codec output. Never interpreted here.
    pub payload: String,
    pub init_flag: InitFlag,
}

impl SessionRecord {
    pub fn new(
        session_id: impl Into<String>,
        application: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            application: application.into(),
            created_at,
            expires_at,
            locked: false,
            lock_token: BASELINE_LOCK_TOKEN,
            lock_acquired_at: None,
            payload: String::new(),
            init_flag: InitFlag::Normal,
        }
    }

    /// A record created ahead of the session's first write. Decodes to the
    /// empty item collection until the first commit clears the flag.
    pub fn placeholder(
        session_id: impl Into<String>,
        application: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::new(session_id, application, created_at, expires_at);
        record.init_flag = InitFlag::NeedsInitialization;
        record
    }

    /// Canonical document id a record is stored under.
    #[must_use]
    pub fn document_id(application: &str, session_id: &str) -> String {
        format!("sessions/{application}/{session_id}")
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// How long the current lock has been held. Zero when unlocked.
    #[must_use]
    pub fn lock_age(&self, now: DateTime<Utc>) -> Duration {
        match self.lock_acquired_at {
            Some(acquired_at) if self.locked => now.signed_duration_since(acquired_at),
            _ => Duration::zero(),
        }
    }

    /// Take the lease: lock, bump the token, stamp the acquisition time.
    pub fn lock(&mut self, now: DateTime<Utc>) {
        self.locked = true;
        self.lock_token += 1;
        self.lock_acquired_at = Some(now);
    }

    /// Drop the lease. The token stays where it is; it never moves
    /// backwards within a lifetime of the key.
    pub fn unlock(&mut self) {
        self.locked = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord::new("s1", "app", now, expires_at)
    }

    #[test]
    fn alive_until_strictly_past_expiry() {
        let now = Utc::now();
        let record = record_at(now, now + Duration::seconds(30));

        assert!(!record.is_expired(now));
        assert!(!record.is_expired(now + Duration::seconds(30)));
        assert!(record.is_expired(now + Duration::seconds(31)));
    }

    #[test]
    fn lock_bumps_token_and_stamps_time() {
        let now = Utc::now();
        let mut record = record_at(now, now + Duration::minutes(20));
        assert_eq!(record.lock_token, BASELINE_LOCK_TOKEN);

        record.lock(now);
        assert!(record.locked);
        assert_eq!(record.lock_token, 1);
        assert_eq!(record.lock_acquired_at, Some(now));

        record.unlock();
        record.lock(now);
        assert_eq!(record.lock_token, 2);
    }

    #[test]
    fn unlock_keeps_token() {
        let now = Utc::now();
        let mut record = record_at(now, now + Duration::minutes(20));
        record.lock(now);
        record.unlock();

        assert!(!record.locked);
        assert_eq!(record.lock_token, 1);
    }

    #[test]
    fn lock_age_counts_from_acquisition() {
        let now = Utc::now();
        let mut record = record_at(now, now + Duration::minutes(20));
        assert_eq!(record.lock_age(now), Duration::zero());

        record.lock(now);
        assert_eq!(record.lock_age(now + Duration::seconds(5)), Duration::seconds(5));

        record.unlock();
        assert_eq!(record.lock_age(now + Duration::seconds(5)), Duration::zero());
    }
}
