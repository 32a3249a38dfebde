use chunkdav_transfer::TransportError;

/// Errors produced by [`FsStore`](crate::FsStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("parent collection missing: {0}")]
    ParentMissing(String),

    #[error("destination exists: {0}")]
    DestinationExists(String),

    #[error("invalid {header} header: {value:?}")]
    BadHeader { header: &'static str, value: String },

    #[error("chunk gap in {dir}: expected offset {expected}, found {found}")]
    ChunkGap { dir: String, expected: u64, found: u64 },

    #[error("assembled size {actual} does not match declared length {declared}")]
    LengthMismatch { declared: u64, actual: u64 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// WebDAV status code a server would answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidPath(_) | Self::BadHeader { .. } => 400,
            Self::ChunkGap { .. } | Self::LengthMismatch { .. } => 400,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 405,
            Self::ParentMissing(_) => 409,
            Self::DestinationExists(_) => 412,
            Self::Io { .. } => 500,
        }
    }

    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.to_string());
        }
        Self::Io {
            path: path.to_string(),
            source,
        }
    }
}

impl From<StoreError> for TransportError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists(_) => {
                TransportError::already_exists(format!("405 Method Not Allowed: {e}"))
            }
            other => TransportError::with_status(other.status(), other.to_string()),
        }
    }
}
