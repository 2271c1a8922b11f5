//! Timeout enforcement.
//!
//! Every outbound call has a deadline. An elapsed deadline becomes
//! [`UpstreamError::Timeout`] and is classified like any other error.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::resilience::types::UpstreamError;

/// Run `fut`, failing with [`UpstreamError::Timeout`] after `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(deadline)),
    }
}
