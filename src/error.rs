use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("gave up locking session {session_id:?} after {attempts} conflicting writes")]
    ConcurrencyExhausted { session_id: String, attempts: u32 },

    #[error("corrupt session payload: {0}")]
    CorruptPayload(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
