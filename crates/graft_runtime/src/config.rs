//! Executor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Spawn sibling fields onto the runtime's worker pool instead of
    /// polling them concurrently within one task.
    pub parallel_fields: bool,
    /// Defer data loader fetches into dispatch rounds.
    pub enable_batching: bool,
    /// Timeout for a single resolver invocation in milliseconds.
    pub field_timeout_ms: Option<u64>,
    /// Maximum number of resolvers running at once. Zero admits one.
    pub max_concurrent_fields: Option<usize>,
    /// Report `extensions.code` on errors.
    pub include_error_codes: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_fields: true,
            enable_batching: true,
            field_timeout_ms: Some(30_000),
            max_concurrent_fields: Some(100),
            include_error_codes: true,
        }
    }
}

impl ExecutorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether sibling fields are spawned.
    pub fn with_parallel_fields(mut self, enabled: bool) -> Self {
        self.parallel_fields = enabled;
        self
    }

    /// Sets whether data loader fetches are batched.
    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.enable_batching = enabled;
        self
    }

    /// Sets the per-resolver timeout.
    pub fn with_field_timeout(mut self, timeout: Duration) -> Self {
        self.field_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Removes the per-resolver timeout.
    pub fn without_field_timeout(mut self) -> Self {
        self.field_timeout_ms = None;
        self
    }

    /// Bounds the number of concurrently running resolvers.
    pub fn with_max_concurrent_fields(mut self, limit: usize) -> Self {
        self.max_concurrent_fields = Some(limit.max(1));
        self
    }

    /// Sets whether error codes are reported.
    pub fn with_error_codes(mut self, enabled: bool) -> Self {
        self.include_error_codes = enabled;
        self
    }

    /// The per-resolver timeout, if any.
    pub fn field_timeout(&self) -> Option<Duration> {
        self.field_timeout_ms.map(Duration::from_millis)
    }
}
