use std::future::Future;
use std::time::Duration;

use tonic::{Code, Status};

use crate::config::RetryConfig;
use crate::error::{CalcError, Result};

/// Bounded retry for unary calls.
///
/// Each attempt runs under its own timeout (an expired attempt counts as
/// `DeadlineExceeded`). Only `NotFound`, `Aborted` and `DeadlineExceeded`
/// are retried; any other failure is returned straight away.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    per_attempt_timeout: Duration,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            per_attempt_timeout: Duration::from_millis(config.per_attempt_timeout_ms),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        self.per_attempt_timeout
    }

    pub fn is_transient(code: Code) -> bool {
        matches!(code, Code::NotFound | Code::Aborted | Code::DeadlineExceeded)
    }

    pub async fn call<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, Status>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let status = match tokio::time::timeout(self.per_attempt_timeout, call()).await {
                Ok(Ok(response)) => return Ok(response.into_inner()),
                Ok(Err(status)) => status,
                Err(_) => Status::deadline_exceeded(format!(
                    "{} timed out after {:?}",
                    op, self.per_attempt_timeout
                )),
            };

            if !Self::is_transient(status.code()) {
                return Err(CalcError::Grpc(status));
            }
            if attempt >= self.max_attempts {
                tracing::error!(op, attempts = attempt, code = ?status.code(), message = status.message(), "RPC retries exhausted");
                return Err(CalcError::RetriesExhausted {
                    op,
                    attempts: attempt,
                    status,
                });
            }

            tracing::warn!(op, attempt, code = ?status.code(), "Transient RPC failure, retrying");
            tokio::time::sleep(self.backoff).await;
        }
    }
}
