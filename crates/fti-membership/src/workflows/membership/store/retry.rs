use std::thread;
use std::time::Duration;

use tracing::warn;

use super::{MembershipStore, RepositoryError, StoreFailure, StoreReader, UnitOfWork};

/// Bounded exponential backoff for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts,
            initial_backoff,
        }
    }

    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn run<T, E, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: StoreFailure,
    {
        let attempts = self.attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match operation() {
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(attempt, attempts, "transient storage failure, retrying");
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(25))
    }
}

/// Store decorator that re-runs whole transactions when the backend reports a transient error.
/// Each attempt starts from a clean transaction, so closures must not carry side effects out.
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: MembershipStore> MembershipStore for RetryingStore<S> {
    fn read<T, E, F>(&self, mut work: F) -> Result<T, E>
    where
        F: FnMut(&dyn StoreReader) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure,
    {
        self.policy.run(|| self.inner.read(&mut work))
    }

    fn transaction<T, E, F>(&self, mut work: F) -> Result<T, E>
    where
        F: FnMut(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<RepositoryError> + StoreFailure,
    {
        self.policy.run(|| self.inner.transaction(&mut work))
    }
}
