use std::time::Duration;

use super::state_machine::ResubmissionMode;
use super::store::RetryPolicy;

/// Tunables for the membership workflow, loaded through [`crate::config::AppConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub resubmission_mode: ResubmissionMode,
    /// Lifetime of the cached admin summary. Zero disables caching.
    pub summary_cache_ttl: Duration,
    pub conversation_page_size: usize,
    pub store_retry: RetryPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            resubmission_mode: ResubmissionMode::default(),
            summary_cache_ttl: Duration::from_secs(30),
            conversation_page_size: 50,
            store_retry: RetryPolicy::default(),
        }
    }
}
