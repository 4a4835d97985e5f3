pub mod store;
pub mod sync;

pub use store::*;
pub use sync::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog file error: {0}")]
    Fs(#[from] crate::fsio::FsError),

    #[error("Catalog snapshot parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SyncError {
    /// RPC-level failure; the caller retries on the next tick.
    #[error("Transient sync failure: {0}")]
    Transient(String),

    /// ERP rows no longer match the expected schema; the sync loop must
    /// stop and alert instead of merging garbage.
    #[error("Fatal sync failure: {0}")]
    Fatal(String),

    #[error("Catalog error during sync: {0}")]
    Catalog(#[from] CatalogError),
}
