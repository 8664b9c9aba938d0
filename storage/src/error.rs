use std::error::Error as StdError;
use std::fmt;

/// Categorizes storage errors by their semantic meaning, independent of
/// the backend that produced them.
///
/// Callers branch on the kind instead of inspecting error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The requested object or bucket does not exist.
    NotFound,

    /// The caller lacks permission for the requested operation.
    PermissionDenied,

    /// The operation failed due to I/O errors (network, disk).
    Io,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

/// An error from a storage driver, tagged with the driver name and a
/// [`StorageErrorKind`] so callers can respond without backend knowledge.
#[derive(Debug, thiserror::Error)]
#[error("storage ({engine}): {kind}: {source}")]
pub struct StorageError {
    engine: &'static str,
    kind: StorageErrorKind,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl StorageError {
    /// Create a new storage error for a driver.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self {
            engine,
            kind,
            source: source.into(),
        }
    }

    /// Create a not-found error for a missing key or bucket.
    pub fn not_found(engine: &'static str, what: impl fmt::Display) -> Self {
        Self::new(
            engine,
            StorageErrorKind::NotFound,
            std::io::Error::new(std::io::ErrorKind::NotFound, what.to_string()),
        )
    }

    /// Categorize an I/O error by its kind.
    pub fn from_io(engine: &'static str, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        };
        Self::new(engine, kind, err)
    }

    /// The semantic category of this error.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// The name of the driver that produced this error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Whether this error indicates a missing object or bucket.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }
}
