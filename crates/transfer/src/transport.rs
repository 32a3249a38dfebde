//! Remote storage capability consumed by the upload engine.
//!
//! `Transport` is implemented by whatever talks to the WebDAV-style store.
//! Keeping it a narrow trait decouples the engine from the client and makes
//! it testable with mocks.

use std::future::Future;
use std::pin::Pin;

/// Header declaring the assembled object's total size before the final move.
pub const TOTAL_LENGTH_HEADER: &str = "OC-Total-Length";

/// Name of the virtual object inside a staging collection that represents
/// the assembled chunks.
pub const ASSEMBLED_OBJECT: &str = ".file";

/// Boxed future returned by [`Transport`] operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Metadata of a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub is_dir: bool,
}

/// Operations the engine needs from the remote store.
pub trait Transport: Send + Sync {
    /// Creates a collection. `recursive` also creates missing parents.
    fn create_collection<'a>(&'a self, path: &'a str, recursive: bool)
    -> TransportFuture<'a, ()>;

    /// Writes (or overwrites) an object.
    fn write_object<'a>(&'a self, path: &'a str, data: &'a [u8]) -> TransportFuture<'a, ()>;

    /// Returns `None` when nothing exists at `path`.
    fn stat_object<'a>(&'a self, path: &'a str) -> TransportFuture<'a, Option<ObjectStat>>;

    /// Moves `src` to `dst`. Moving a staging collection's assembled object
    /// assembles the chunks on the server.
    fn rename_object<'a>(
        &'a self,
        src: &'a str,
        dst: &'a str,
        overwrite: bool,
    ) -> TransportFuture<'a, ()>;

    /// Removes `path` recursively.
    fn remove_all<'a>(&'a self, path: &'a str) -> TransportFuture<'a, ()>;

    /// Sets a header sent with subsequent write/rename calls. An empty value
    /// clears it.
    fn set_protocol_header(&self, name: &str, value: &str);
}

/// Broad classification of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    AlreadyExists,
    NotFound,
    Other,
}

/// Error reported by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.status, .message))]
pub struct TransportError {
    kind: TransportErrorKind,
    status: Option<u16>,
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Other,
            status: None,
            message: message.into(),
        }
    }

    /// Error carrying an HTTP-like status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => TransportErrorKind::NotFound,
            _ => TransportErrorKind::Other,
        };
        Self {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Structured "already exists" error, for transports that can tell.
    pub fn already_exists(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::AlreadyExists,
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if a collection creation failed only because the
    /// collection is already there.
    ///
    /// Besides the structured kind, the rendered text is matched against
    /// `exists`, `405` and `409`, which is what WebDAV servers answer to a
    /// MKCOL on an existing path.
    pub fn is_already_exists(&self) -> bool {
        if self.kind == TransportErrorKind::AlreadyExists {
            return true;
        }
        let text = self.to_string();
        text.contains("exists") || text.contains("405") || text.contains("409")
    }
}

fn render(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("{code} {message}"),
        None => message.to_string(),
    }
}
