use std::future::Future;
use tracing::warn;

use crate::common::error::PipelineError;

/// Spawn a detached task whose failure must never block or fail the caller.
///
/// The adaptive-learning feedback calls are the main user: pattern-store
/// writes ride on this so a degraded persistence backend cannot stall
/// resolution or promotion. Errors are routed to the structured log under
/// the given label rather than discarded.
pub fn spawn_logged<F>(label: &'static str, fut: F)
where
    F: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!(task = label, error = %e, "detached task failed");
        }
    });
}
