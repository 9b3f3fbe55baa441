/// Store failures split by whether a retry can plausibly succeed.
/// Connection drops, pool exhaustion and lock timeouts are transient;
/// decode and constraint bugs are not.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),

    #[error("cache codec failure: {0}")]
    Codec(String),
}

/// Errors bubbling out of the diff/apply pipeline to the worker, which
/// decides retry vs terminal failure.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Malformed event; retrying cannot fix it, so the job is dropped.
    #[error("unknown offer kind: {0}")]
    UnknownOfferKind(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl SyncError {
    /// Cache failures are always retryable: the transaction already
    /// committed, and a re-run produces an empty diff plus a fresh
    /// invalidation attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::UnknownOfferKind(_) => false,
            SyncError::Store(e) => e.is_transient(),
            SyncError::Cache(_) => true,
        }
    }
}
