//! Local directory store that behaves like a chunking WebDAV server.
//!
//! Used to run the upload engine end to end without a network client.

mod error;
mod store;

pub use error::StoreError;
pub use store::FsStore;
