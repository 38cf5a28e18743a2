//! Deadline and bounded retry around a single-attempt client.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use super::{ExtractionClient, ExtractionRequest};
use crate::error::ClientError;
use crate::invoice::ExtractionReply;
use crate::models::config::ModelConfig;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Wraps an [`ExtractionClient`] with a per-attempt deadline.
///
/// Only [`ClientError::Transport`] failures are retried, at most
/// `max_retries` times after the first attempt. Policy and quota
/// failures surface immediately.
pub struct RetryingClient<C> {
    inner: C,
    timeout: Duration,
    backoff: ExponentialBuilder,
}

impl<C: ExtractionClient> RetryingClient<C> {
    pub fn new(inner: C, config: &ModelConfig) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(config.retry_min_delay())
            .with_max_delay(MAX_RETRY_DELAY.max(config.retry_min_delay()))
            .with_max_times(config.max_retries)
            .with_jitter();

        Self {
            inner,
            timeout: config.request_timeout(),
            backoff,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn attempt(&self, request: &ExtractionRequest) -> Result<ExtractionReply, ClientError> {
        match tokio::time::timeout(self.timeout, self.inner.extract(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transport(format!(
                "timed out after {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }
}

#[async_trait]
impl<C: ExtractionClient> ExtractionClient for RetryingClient<C> {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionReply, ClientError> {
        let attempt = || async { self.attempt(request).await };
        attempt
            .retry(self.backoff.clone())
            .when(ClientError::is_retryable)
            .notify(|err, delay| {
                warn!("{}: {}; retrying in {:?}", request.filename(), err, delay);
            })
            .await
    }
}
