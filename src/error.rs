//! Matchable error kinds.
//!
//! All fallible operations return `anyhow::Result`; the kinds a caller may
//! need to branch on are raised as `StoreError` and recovered with
//! `anyhow::Error::downcast_ref`. Plain I/O failures stay as wrapped
//! `std::io::Error` with context. A full group is not an error: `put`
//! reports it through the accepted-prefix count.

use thiserror::Error;

use crate::group::GroupState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("log is read-only")]
    ReadOnly,

    #[error("block not found")]
    NotFound,

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("bad group state: expected {expected}, got {actual}")]
    BadState {
        expected: GroupState,
        actual: GroupState,
    },

    #[error("operation cancelled")]
    Cancelled,
}

#[inline]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound))
}

#[inline]
pub fn is_read_only(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::ReadOnly))
}

#[inline]
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Cancelled))
}

#[inline]
pub fn is_corrupt(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Corrupt(_)))
}

#[inline]
pub fn is_bad_state(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::BadState { .. })
    )
}
