//! Bounded, retrying fetch pool.
//!
//! Runs one [`Fetcher`] call per identifier with at most
//! [`PoolConfig::max_workers`] requests in flight. Each identifier gets up to
//! [`RetryPolicy::max_attempts`] attempts:
//!
//! - success ends the task;
//! - a [`AttemptError::Definitive`] failure (HTTP error status, bad payload)
//!   ends it immediately without retrying;
//! - a [`AttemptError::Transient`] failure (timeout, dropped connection)
//!   sleeps for [`RetryPolicy::delay`] and tries again.
//!
//! Outcomes are folded into a caller-owned [`FetchLedger`] by a single
//! aggregator once the stream yields them, so no set is shared between
//! in-flight requests.

use futures::stream::{self, StreamExt};
use rand::Rng;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default concurrency cap
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Default attempts per identifier
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Why a single attempt did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Worth retrying: timeouts and connection drops
    Transient(String),
    /// Not worth retrying: HTTP error status or anything else
    Definitive(String),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transient(reason) => write!(f, "transient: {}", reason),
            AttemptError::Definitive(reason) => write!(f, "{}", reason),
        }
    }
}

/// A per-identifier fetch function.
pub trait Fetcher {
    /// Make one attempt at fetching the payload for `identifier`.
    fn fetch(&self, identifier: &str) -> impl Future<Output = Result<String, AttemptError>> + Send;
}

/// Delay between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDelay {
    /// Uniform random delay in `[min, max]`, drawn independently per attempt.
    /// Does not grow with the attempt number.
    Jitter { min: Duration, max: Duration },
    /// `initial * 2^(attempt-1)`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

/// Attempts and delays for one identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: RetryDelay,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: RetryDelay::Jitter {
                min: Duration::from_secs(1),
                max: Duration::from_secs(3),
            },
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match &self.delay {
            RetryDelay::Jitter { min, max } => {
                if max <= min {
                    return *min;
                }
                let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
                Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
            }
            RetryDelay::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(*max)
            }
        }
    }
}

/// Pool-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum requests in flight
    pub max_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one identifier's fetch task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub identifier: String,
    /// Attempts actually made
    pub attempts: u32,
    pub result: Result<String, AttemptError>,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Success and failure sets for one run.
///
/// The sets stay disjoint: recording one outcome removes the identifier
/// from the other set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchLedger {
    successes: BTreeSet<String>,
    failures: BTreeSet<String>,
}

impl FetchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, identifier: &str) {
        self.failures.remove(identifier);
        self.successes.insert(identifier.to_string());
    }

    pub fn record_failure(&mut self, identifier: &str) {
        self.successes.remove(identifier);
        self.failures.insert(identifier.to_string());
    }

    pub fn successes(&self) -> &BTreeSet<String> {
        &self.successes
    }

    pub fn failures(&self) -> &BTreeSet<String> {
        &self.failures
    }

    pub fn is_success(&self, identifier: &str) -> bool {
        self.successes.contains(identifier)
    }

    pub fn is_failure(&self, identifier: &str) -> bool {
        self.failures.contains(identifier)
    }

    /// Check `|success| + |failure| == expected`, warning on mismatch.
    pub fn verify(&self, expected: usize) -> bool {
        let processed = self.successes.len() + self.failures.len();
        if processed == expected {
            info!(expected, "All identifiers processed");
            true
        } else {
            warn!(
                expected,
                processed,
                successes = self.successes.len(),
                failures = self.failures.len(),
                "Discrepancy in total processed identifiers"
            );
            false
        }
    }
}

/// Drop repeated identifiers, keeping first-occurrence order.
pub fn distinct_identifiers<I, S>(identifiers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    identifiers
        .into_iter()
        .map(|id| id.as_ref().trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

/// Fetch every identifier with bounded concurrency and fold the outcomes
/// into `ledger`.
///
/// Repeated identifiers are fetched once. Outcomes come back in completion
/// order, not input order.
pub async fn fetch_all<F: Fetcher>(
    fetcher: &F,
    identifiers: &[String],
    config: &PoolConfig,
    mut ledger: FetchLedger,
) -> (FetchLedger, Vec<FetchOutcome>) {
    let distinct = distinct_identifiers(identifiers);
    if distinct.len() != identifiers.len() {
        warn!(
            given = identifiers.len(),
            distinct = distinct.len(),
            "Skipping repeated identifiers"
        );
    }

    let workers = config.max_workers.max(1);
    info!(count = distinct.len(), workers, "Starting bounded fetch");

    let outcomes: Vec<FetchOutcome> = stream::iter(distinct.iter())
        .map(|identifier| fetch_with_retry(fetcher, identifier, &config.retry))
        .buffer_unordered(workers)
        .collect()
        .await;

    for outcome in &outcomes {
        match &outcome.result {
            Ok(_) => ledger.record_success(&outcome.identifier),
            Err(_) => ledger.record_failure(&outcome.identifier),
        }
    }

    info!(
        successes = ledger.successes().len(),
        failures = ledger.failures().len(),
        "Bounded fetch complete"
    );

    (ledger, outcomes)
}

/// Run one identifier's task to completion.
pub async fn fetch_with_retry<F: Fetcher>(
    fetcher: &F,
    identifier: &str,
    policy: &RetryPolicy,
) -> FetchOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = AttemptError::Definitive("no attempt made".to_string());

    for attempt in 1..=max_attempts {
        match fetcher.fetch(identifier).await {
            Ok(payload) => {
                debug!(identifier, attempt, "Fetched");
                return FetchOutcome {
                    identifier: identifier.to_string(),
                    attempts: attempt,
                    result: Ok(payload),
                };
            }
            Err(AttemptError::Definitive(reason)) => {
                warn!(identifier, attempt, reason = %reason, "Fetch failed");
                return FetchOutcome {
                    identifier: identifier.to_string(),
                    attempts: attempt,
                    result: Err(AttemptError::Definitive(reason)),
                };
            }
            Err(AttemptError::Transient(reason)) => {
                warn!(
                    identifier,
                    attempt,
                    max_attempts,
                    reason = %reason,
                    "Transient fetch error"
                );
                last_error = AttemptError::Transient(reason);
                if attempt < max_attempts {
                    let delay = policy.delay_after(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    warn!(identifier, max_attempts, "Attempts exhausted");
    FetchOutcome {
        identifier: identifier.to_string(),
        attempts: max_attempts,
        result: Err(last_error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed script of attempt results per identifier and counts calls.
    struct ScriptedFetcher {
        scripts: Mutex<HashMap<String, Vec<Result<String, AttemptError>>>>,
        calls: Mutex<HashMap<String, u32>>,
        in_flight: AtomicU32,
        peak: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(scripts: Vec<(&str, Vec<Result<String, AttemptError>>)>) -> Self {
            Self {
                scripts: Mutex::new(
                    scripts
                        .into_iter()
                        .map(|(id, mut s)| {
                            s.reverse();
                            (id.to_string(), s)
                        })
                        .collect(),
                ),
                calls: Mutex::new(HashMap::new()),
                in_flight: AtomicU32::new(0),
                peak: AtomicU32::new(0),
            }
        }

        fn calls(&self, id: &str) -> u32 {
            self.calls.lock().expect("lock").get(id).copied().unwrap_or(0)
        }
    }

    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, identifier: &str) -> Result<String, AttemptError> {
            *self
                .calls
                .lock()
                .expect("lock")
                .entry(identifier.to_string())
                .or_insert(0) += 1;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.scripts
                .lock()
                .expect("lock")
                .get_mut(identifier)
                .and_then(|s| s.pop())
                .unwrap_or_else(|| Ok(format!("@article{{{}}}", identifier)))
        }
    }

    fn no_delay(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: RetryDelay::Jitter {
                min: Duration::ZERO,
                max: Duration::ZERO,
            },
        }
    }

    fn timeout() -> Result<String, AttemptError> {
        Err(AttemptError::Transient("timed out".to_string()))
    }

    #[tokio::test]
    async fn test_two_timeouts_then_success() {
        let fetcher = ScriptedFetcher::new(vec![(
            "10.1/a",
            vec![timeout(), timeout(), Ok("@article{a}".to_string())],
        )]);

        let outcome = fetch_with_retry(&fetcher, "10.1/a", &no_delay(3)).await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Ok("@article{a}".to_string()));
        assert_eq!(fetcher.calls("10.1/a"), 3);
    }

    #[tokio::test]
    async fn test_definitive_error_is_not_retried() {
        let fetcher = ScriptedFetcher::new(vec![(
            "10.1/missing",
            vec![Err(AttemptError::Definitive("HTTP 404".to_string()))],
        )]);

        let outcome = fetch_with_retry(&fetcher, "10.1/missing", &no_delay(3)).await;
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.is_success());
        assert_eq!(fetcher.calls("10.1/missing"), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail() {
        let fetcher = ScriptedFetcher::new(vec![(
            "10.1/slow",
            vec![timeout(), timeout(), timeout(), Ok("late".to_string())],
        )]);

        let outcome = fetch_with_retry(&fetcher, "10.1/slow", &no_delay(3)).await;
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(outcome.result, Err(AttemptError::Transient(_))));
    }

    #[tokio::test]
    async fn test_fetch_all_partitions_every_identifier() {
        let fetcher = ScriptedFetcher::new(vec![
            ("10.1/b", vec![Err(AttemptError::Definitive("HTTP 404".to_string()))]),
            ("10.1/c", vec![timeout(), timeout(), timeout()]),
            ("10.1/d", vec![timeout(), Ok("d".to_string())]),
        ]);
        let ids: Vec<String> = (0..12)
            .map(|i| format!("10.1/x{}", i))
            .chain(["10.1/b", "10.1/c", "10.1/d"].map(String::from))
            .collect();
        let config = PoolConfig {
            max_workers: 5,
            retry: no_delay(3),
        };

        let (ledger, outcomes) = fetch_all(&fetcher, &ids, &config, FetchLedger::new()).await;

        assert_eq!(outcomes.len(), ids.len());
        assert!(ledger.verify(ids.len()));
        assert!(ledger.successes().is_disjoint(ledger.failures()));
        assert!(ledger.is_failure("10.1/b"));
        assert!(ledger.is_failure("10.1/c"));
        assert!(ledger.is_success("10.1/d"));
        assert_eq!(ledger.successes().len(), 13);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_fetch_all_fetches_repeated_identifiers_once() {
        let fetcher = ScriptedFetcher::new(vec![]);
        let ids = vec!["10.1/a".to_string(), "10.1/a".to_string(), "10.1/b".to_string()];

        let (ledger, outcomes) =
            fetch_all(&fetcher, &ids, &PoolConfig::default(), FetchLedger::new()).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(fetcher.calls("10.1/a"), 1);
        assert!(ledger.verify(2));
        assert!(!ledger.verify(ids.len()));
    }

    #[test]
    fn test_ledger_sets_stay_disjoint() {
        let mut ledger = FetchLedger::new();
        ledger.record_success("10.1/a");
        ledger.record_failure("10.1/a");
        assert!(!ledger.is_success("10.1/a"));
        assert!(ledger.is_failure("10.1/a"));
        assert_eq!(ledger.successes().len() + ledger.failures().len(), 1);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10 {
            let delay = policy.delay_after(attempt);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            delay: RetryDelay::Exponential {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(3),
            },
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1));
        assert_eq!(policy.delay_after(4), Duration::from_secs(3));
    }

    #[test]
    fn test_distinct_identifiers() {
        let ids = distinct_identifiers(["10.1/a", " 10.1/a ", "", "10.1/b"]);
        assert_eq!(ids, vec!["10.1/a", "10.1/b"]);
    }
}
