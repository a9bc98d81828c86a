//! Errors surfaced by the TTL layer.

use crate::store::StoreError;
use crate::ttl::codec::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TtlError {
    /// A read, write, batch or scan against a store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Metadata could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A public operation was called with unusable arguments
    #[error("{0}")]
    InvalidArgument(String),

    /// The options passed at setup are inconsistent
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TtlError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TtlError::Store(e) if e.is_not_found())
    }
}

pub type TtlResult<T> = Result<T, TtlError>;
