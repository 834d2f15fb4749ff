//! Deadline wrapper for collaborator calls
//!
//! Every external call (inference, market data, search) goes through
//! `with_timeout`, so an overrun surfaces as `OrchestrationError::Timeout`
//! and is handled by the calling node like any other failure.

use crate::error::OrchestrationError;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub async fn with_timeout<T, F>(duration: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, seconds = duration.as_secs(), "Collaborator call timed out");
            Err(OrchestrationError::Timeout {
                operation: operation.to_string(),
                seconds: duration.as_secs(),
            })
        }
    }
}
