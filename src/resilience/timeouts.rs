//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend calls and health probes with a deadline
//! - Cancel operations cleanly on timeout (the future is dropped, which
//!   releases its pooled connection)
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors
//! - Timed-out proxy requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

/// The deadline passed before the wrapped operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Run `future` with a deadline of `limit`.
pub async fn with_timeout<F, T>(limit: Duration, future: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| Elapsed(limit))
}
