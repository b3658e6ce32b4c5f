//! Reconciliation loop primitives.
//!
//! This library provides helpers for level-triggered reconcilers that mutate
//! records owned by an external store guarded by optimistic concurrency. Key
//! concepts:
//!
//! - **Version token**: every read returns the record together with the
//!   version it was observed at; writes are conditional on that version.
//! - **Compare-and-update**: a candidate value is computed from the record just
//!   read and submitted only when it differs from it.
//! - **Conflict retry**: a stale version token triggers a fresh read and a full
//!   recompute, bounded by a [`BackoffPolicy`].
//!
//! # Invariants
//!
//! - An unchanged candidate never produces a write
//! - Conflicting writes are never merged; every retry starts from a new read
//! - The retry budget is finite

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Errors returned by the stores a reconciler writes through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The version token was stale (concurrent modification).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Resource not found.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Any other backend failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ReconcileError {
    /// Returns true if the error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if the addressed record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors that can tell a retryable conflict apart from everything else.
pub trait Retryable {
    fn is_conflict(&self) -> bool;
}

impl Retryable for ReconcileError {
    fn is_conflict(&self) -> bool {
        ReconcileError::is_conflict(self)
    }
}

/// A record value paired with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

/// Exponential backoff used between conflict retries.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,

    /// Upper bound of the delay before jitter.
    pub max: Duration,

    /// Multiplier applied to the delay after every retry.
    pub factor: f64,

    /// Total attempts, the first one included.
    pub steps: u32,

    /// Jitter factor (0.0 to 1.0); adds up to `jitter * delay`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(30),
            factor: 5.0,
            steps: 4,
            jitter: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// Calculate the delay that follows the given (zero-based) attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.initial.as_millis() as f64 * self.factor.powi(attempt as i32);
        let delay = delay.min(self.max.as_millis() as f64);
        let jitter = if self.jitter > 0.0 {
            delay * self.jitter * rand::random::<f64>()
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter) as u64)
    }

    /// Whether another attempt may follow `attempt` (zero-based).
    fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt + 1 < self.steps
    }
}

/// Outcome of [`apply_if_changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    /// The value the record holds after the call.
    pub value: T,

    /// Whether a write was submitted on the successful attempt.
    pub written: bool,
}

/// Conditional read-modify-write.
///
/// Each attempt reads the record, computes a candidate from the value just
/// read, and submits it with the read version only if it differs. A conflict
/// restarts from the read; the policy bounds how often.
pub async fn apply_if_changed<T, E, R, RFut, C, CFut, W, WFut>(
    policy: &BackoffPolicy,
    mut read: R,
    mut compute: C,
    mut write: W,
) -> Result<Applied<T>, E>
where
    T: Clone + PartialEq,
    E: Retryable,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<Versioned<T>, E>>,
    C: FnMut(T) -> CFut,
    CFut: Future<Output = Result<T, E>>,
    W: FnMut(Versioned<T>) -> WFut,
    WFut: Future<Output = Result<(), E>>,
{
    let mut attempt = 0;
    loop {
        match apply_once(&mut read, &mut compute, &mut write).await {
            Err(e) if e.is_conflict() && policy.allows_retry_after(attempt) => {
                backoff(policy, attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

async fn apply_once<T, E, R, RFut, C, CFut, W, WFut>(
    read: &mut R,
    compute: &mut C,
    write: &mut W,
) -> Result<Applied<T>, E>
where
    T: Clone + PartialEq,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<Versioned<T>, E>>,
    C: FnMut(T) -> CFut,
    CFut: Future<Output = Result<T, E>>,
    W: FnMut(Versioned<T>) -> WFut,
    WFut: Future<Output = Result<(), E>>,
{
    let current = read().await?;
    let candidate = compute(current.value.clone()).await?;
    if candidate == current.value {
        return Ok(Applied {
            value: candidate,
            written: false,
        });
    }

    write(Versioned::new(candidate.clone(), current.version)).await?;
    Ok(Applied {
        value: candidate,
        written: true,
    })
}

async fn backoff(policy: &BackoffPolicy, attempt: u32) {
    let delay = policy.delay(attempt);
    debug!(
        attempt,
        delay_ms = delay.as_millis() as u64,
        "Write conflict, retrying after backoff"
    );
    tokio::time::sleep(delay).await;
}

/// Default interval between reconciliation passes.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast_policy(steps: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(10),
            factor: 2.0,
            steps,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(30),
            factor: 5.0,
            steps: 4,
            jitter: 0.0,
        };

        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(2), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let policy = BackoffPolicy {
            max: Duration::from_millis(200),
            jitter: 0.0,
            steps: 64,
            ..BackoffPolicy::default()
        };

        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(40), Duration::from_millis(200));

        let jittered = BackoffPolicy {
            jitter: 0.1,
            ..policy
        };
        assert!(jittered.delay(40) <= Duration::from_millis(220));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let policy = BackoffPolicy::default();
        for _ in 0..32 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(50));
            assert!(d <= Duration::from_millis(55));
        }
    }

    /// Single-record store with a version counter and injectable conflicts.
    struct Cell {
        record: Mutex<Versioned<i32>>,
        conflicts: AtomicU32,
        writes: AtomicU32,
    }

    impl Cell {
        fn new(value: i32) -> Self {
            Self {
                record: Mutex::new(Versioned::new(value, 1)),
                conflicts: AtomicU32::new(0),
                writes: AtomicU32::new(0),
            }
        }

        async fn read(&self) -> Result<Versioned<i32>, ReconcileError> {
            Ok(self.record.lock().unwrap().clone())
        }

        async fn write(&self, candidate: Versioned<i32>) -> Result<(), ReconcileError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                // Someone else bumped the record in between.
                let mut record = self.record.lock().unwrap();
                record.version += 1;
                return Err(ReconcileError::Conflict("stale version".into()));
            }
            let mut record = self.record.lock().unwrap();
            if record.version != candidate.version {
                return Err(ReconcileError::Conflict("stale version".into()));
            }
            *record = Versioned::new(candidate.value, record.version + 1);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_apply_skips_unchanged() {
        let cell = Cell::new(7);
        let applied = apply_if_changed(
            &fast_policy(4),
            || cell.read(),
            |v| async move { Ok(v) },
            |c| cell.write(c),
        )
        .await
        .unwrap();

        assert!(!applied.written);
        assert_eq!(applied.value, 7);
        assert_eq!(cell.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_apply_rereads_after_conflict() {
        let cell = Cell::new(1);
        cell.conflicts.store(2, Ordering::SeqCst);
        let computes = AtomicU32::new(0);

        let applied = apply_if_changed(
            &fast_policy(4),
            || cell.read(),
            |v| {
                computes.fetch_add(1, Ordering::SeqCst);
                async move { Ok(v + 1) }
            },
            |c| cell.write(c),
        )
        .await
        .unwrap();

        assert!(applied.written);
        assert_eq!(applied.value, 2);
        assert_eq!(cell.writes.load(Ordering::SeqCst), 3);
        assert_eq!(computes.load(Ordering::SeqCst), 3);
        assert_eq!(cell.record.lock().unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_apply_budget_exhausted() {
        let cell = Cell::new(1);
        cell.conflicts.store(10, Ordering::SeqCst);

        let result = apply_if_changed(
            &fast_policy(3),
            || cell.read(),
            |v| async move { Ok(v + 1) },
            |c| cell.write(c),
        )
        .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(cell.writes.load(Ordering::SeqCst), 3);
        assert_eq!(cell.record.lock().unwrap().value, 1);
    }

    #[tokio::test]
    async fn test_apply_not_found_not_retried() {
        let reads = AtomicU32::new(0);
        let reads = &reads;

        let result: Result<Applied<i32>, ReconcileError> = apply_if_changed(
            &fast_policy(4),
            || async move {
                reads.fetch_add(1, Ordering::SeqCst);
                Err(ReconcileError::NotFound("demo".into()))
            },
            |v| async move { Ok(v) },
            |_| async { Ok(()) },
        )
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }
}
