//! Error types shared across the Locket crates

/// Error type for lock engine operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Script execution or pub/sub call failed. No local state was mutated;
    /// the caller may retry the whole operation.
    #[error("store connectivity error: {0}")]
    Connectivity(String),

    /// Release attempted by an owner that does not hold the lock.
    #[error("lock `{name}` is not held by owner `{owner}`")]
    NotOwner { name: String, owner: String },

    /// Rejected before any network call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The wake subscription for a channel went away while a waiter was
    /// still blocked on it.
    #[error("wake subscription closed for channel `{0}`")]
    SubscriptionClosed(String),

    /// The store returned a reply shape the script contract does not allow.
    #[error("unexpected reply from script {script}: {detail}")]
    Protocol { script: &'static str, detail: String },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;
