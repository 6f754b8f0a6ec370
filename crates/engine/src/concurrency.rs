// SPDX-License-Identifier: MIT

//! Global concurrency cap on live `running` executions (spec §4.4): a
//! single integer bounds concurrent processes; overflow returns `busy`
//! rather than queuing.

use bitk_core::EngineError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Reasonable default; the source left the exact value unfixed (spec §9
/// open question).
pub const DEFAULT_CONCURRENCY_CAP: usize = 4;

pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    pub fn new(cap: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(cap)),
        }
    }

    /// Non-blocking acquire: returns `busy` immediately instead of
    /// queuing (spec §4.4 "overflow attempts return a busy error").
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::Busy("concurrency cap reached".to_string()))
    }
}
