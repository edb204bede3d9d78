use thiserror::Error;

/// Primary error type for keymint resolver operations.
///
/// Structured variants for the conditions callers dispatch on, with stable
/// diagnostic phrases for the lock and conflict cases so tooling can match
/// on the message as well as the variant.
#[derive(Error, Debug)]
pub enum KeymintError {
    // === Not found ===
    /// No forward mapping exists for the key.
    #[error("no mapping for key: '{key}'")]
    KeyNotFound { key: String },

    /// No reverse mapping exists for the value.
    #[error("no mapping for value: {value}")]
    ValueNotFound { value: u64 },

    // === Locked ===
    /// A create was attempted while the scope is write-locked or retired.
    #[error("locatable resolver is not writable")]
    NotWritable,

    /// The caller-supplied pre-write check rejected the create.
    #[error("prewrite check failed")]
    PreWriteCheckFailed,

    /// `exclusive_lock` was called on a scope that is not unlocked.
    #[error("resolver must be unlocked to get exclusive lock")]
    ExclusiveLockContested,

    // === Conflict ===
    /// `create` on a key that already has a mapping.
    #[error("mapping already exists: '{key}'")]
    AlreadyExists { key: String },

    /// `set_mapping` found a forward entry with a different value.
    #[error("mapping already exists with different value: '{key}' is {existing}, requested {requested}")]
    ValueMismatch {
        key: String,
        existing: u64,
        requested: u64,
    },

    /// `set_mapping` found a reverse entry with a different key.
    #[error("reverse mapping already exists with different key: {value} is '{existing}', requested '{requested}'")]
    ReverseKeyMismatch {
        value: u64,
        existing: String,
        requested: String,
    },

    // === Retry ===
    /// A serializable transaction lost a commit race (first-committer-wins).
    ///
    /// Transient: internal retry loops absorb this; it only escapes wrapped
    /// in [`KeymintError::RetryExhausted`].
    #[error("transaction commit conflict")]
    CommitConflict,

    /// The retry budget for allocation or state CAS was spent.
    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<KeymintError>,
    },

    // === Corruption ===
    /// Undecodable state record, undecodable entry, or a bidirectional
    /// mapping missing one of its halves. Fatal for the scope.
    #[error("resolver state is corrupt: {detail}")]
    StateCorrupt { detail: String },

    // === Propagated from the store ===
    /// The operation's cancellation flag was raised before commit.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline elapsed before commit.
    #[error("operation timed out")]
    Timeout,
}

/// Coarse classification of [`KeymintError`] for dispatch and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Locked,
    Conflict,
    CommitConflict,
    RetryExhausted,
    StateCorrupt,
    Cancelled,
    Timeout,
}

impl KeymintError {
    /// Map this error to its coarse kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound { .. } | Self::ValueNotFound { .. } => ErrorKind::NotFound,
            Self::NotWritable | Self::PreWriteCheckFailed | Self::ExclusiveLockContested => {
                ErrorKind::Locked
            }
            Self::AlreadyExists { .. }
            | Self::ValueMismatch { .. }
            | Self::ReverseKeyMismatch { .. } => ErrorKind::Conflict,
            Self::CommitConflict => ErrorKind::CommitConflict,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::StateCorrupt { .. } => ErrorKind::StateCorrupt,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout => ErrorKind::Timeout,
        }
    }

    /// Whether this is a transient error that may succeed on retry.
    ///
    /// Lock violations, conflicts, and pre-write failures are deliberate
    /// outcomes and never transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::CommitConflict)
    }

    /// Whether this error indicates persistent data that cannot be trusted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::StateCorrupt { .. })
    }

    /// Create a key-not-found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Create a value-not-found error.
    #[must_use]
    pub const fn value_not_found(value: u64) -> Self {
        Self::ValueNotFound { value }
    }

    /// Create a state-corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::StateCorrupt {
            detail: detail.into(),
        }
    }

    /// Wrap the final transient failure once a retry budget is spent.
    #[must_use]
    pub fn retry_exhausted(attempts: u32, source: KeymintError) -> Self {
        Self::RetryExhausted {
            attempts,
            source: Box::new(source),
        }
    }
}

/// Result type alias using [`KeymintError`].
pub type Result<T> = std::result::Result<T, KeymintError>;
