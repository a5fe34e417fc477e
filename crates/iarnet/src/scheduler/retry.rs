//! Caller-side deploy retry with randomized backoff.
//!
//! The scheduler itself never retries: it reports a single
//! `NoAvailableProvider` after exhausting every candidate. This wrapper is
//! where the execution engine's retry policy lives: re-attempt on
//! retryable errors only, waiting a random interval inside the configured
//! window between attempts so a burst of rejected callers does not
//! stampede back in lockstep.

use crate::config::RetrySection;
use crate::error::{IarnetError, Result};
use crate::resources::{Language, ResourceInfo};
use crate::scheduler::{Component, Scheduler};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deploy with up to `policy.max_attempts` attempts.
///
/// Retries only errors classified retryable (`NoAvailableProvider`,
/// network-class backend failures); everything else, including
/// cancellation, surfaces immediately.
#[tracing::instrument(
    name = "scheduler.deploy_with_retry",
    skip(scheduler, cancel, request, policy),
    fields(language = %language, attempt = tracing::field::Empty)
)]
pub async fn deploy_with_retry(
    scheduler: &Scheduler,
    cancel: &CancellationToken,
    language: Language,
    request: ResourceInfo,
    policy: &RetrySection,
) -> Result<Arc<Component>> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        tracing::Span::current().record("attempt", attempt);
        if cancel.is_cancelled() {
            return Err(IarnetError::Cancelled);
        }

        match scheduler
            .deploy_component(cancel, language, request.clone())
            .await
        {
            Ok(component) => return Ok(component),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let wait_secs = random_backoff_secs(policy);
                log::info!(
                    "deploy attempt {}/{} failed ({}); retrying in {}s",
                    attempt,
                    max_attempts,
                    e,
                    wait_secs
                );
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(wait_secs)) => false,
                    _ = cancel.cancelled() => true,
                };
                if cancelled {
                    return Err(IarnetError::Cancelled);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn random_backoff_secs(policy: &RetrySection) -> u64 {
    if policy.delay_min_secs >= policy.delay_max_secs {
        return policy.delay_min_secs;
    }
    rand::rng().random_range(policy.delay_min_secs..=policy.delay_max_secs)
}
