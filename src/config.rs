use chrono::Duration;

/// Construction-time settings for a lease manager. Passed in explicitly;
/// nothing here is read from ambient process state.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Namespace the session records are stored against. Records from
    /// different applications never collide, even for equal session ids.
    pub application: String,

    /// Idle timeout. Every successful write pushes `expires_at` this far
    /// into the future.
    pub timeout: Duration,

    /// How many conflicting writes an exclusive acquire tolerates before
    /// giving up. Release, commit, and remove reuse the same bound when
    /// re-reading around a lost write race.
    pub retries_on_conflict: u32,
}

impl SessionConfig {
    /// Defaults: 20 minute idle timeout, 3 retries on conflict.
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            timeout: Duration::minutes(20),
            retries_on_conflict: 3,
        }
    }
}
