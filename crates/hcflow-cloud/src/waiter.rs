//! Poll-until-state waiting for long-running cloud operations
//!
//! Most mutating cloud APIs return before the work is done. The caller then
//! polls a status endpoint until the resource reaches one of the `target`
//! states, while tolerating the `pending` ones. [`StateChangeConf`] drives that
//! loop with a fixed cadence (or a capped exponential backoff), a deadline and
//! an optional requirement to see the target state several times in a row.
//!
//! ```ignore
//! let conf = StateChangeConf::new(["ACTIVE", "BACKING UP"], Duration::from_secs(1800))
//!     .pending(["BUILD"])
//!     .delay(Duration::from_secs(20))
//!     .poll_interval(Duration::from_secs(10))
//!     .continuous_target_occurence(2);
//!
//! let observation = conf.wait_for_state(|| instance_state(&client, &id)).await?;
//! ```

use crate::error::CloudError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until, timeout_at};

/// Starting point of the exponential backoff used when no poll interval is set
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound of the exponential backoff
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Result of a single poll: the observed value (if any) and its state label
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub value: Option<T>,
    pub state: String,
}

impl<T> Observation<T> {
    pub fn new(value: T, state: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            state: state.into(),
        }
    }

    /// An observation without a payload, e.g. a resource that no longer exists
    pub fn empty(state: impl Into<String>) -> Self {
        Self {
            value: None,
            state: state.into(),
        }
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

/// Describes how to wait for a remote resource to reach a target state
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// States that mean "still in progress"
    pub pending: Vec<String>,

    /// States that mean "done"
    pub target: Vec<String>,

    /// Wait before the first poll
    pub delay: Duration,

    /// Fixed time between polls. Zero switches to exponential backoff.
    pub poll_interval: Duration,

    /// Lower bound for the exponential backoff
    pub min_timeout: Duration,

    /// Overall budget, measured from the start of the wait (delay included)
    pub timeout: Duration,

    /// How many consecutive target observations are required before success
    pub continuous_target_occurence: u32,
}

impl StateChangeConf {
    pub fn new<I, S>(target: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: Vec::new(),
            target: target.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            min_timeout: Duration::ZERO,
            timeout,
            continuous_target_occurence: 1,
        }
    }

    pub fn pending<I, S>(mut self, pending: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = pending.into_iter().map(Into::into).collect();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    pub fn continuous_target_occurence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurence = occurrences;
        self
    }

    fn is_target(&self, state: &str) -> bool {
        self.target.iter().any(|t| t == state)
    }

    fn is_pending(&self, state: &str) -> bool {
        self.pending.iter().any(|p| p == state)
    }

    fn timeout_error(&self, last_state: &str) -> CloudError {
        CloudError::Timeout {
            last_state: last_state.to_string(),
            expected: self.target.clone(),
            timeout: self.timeout,
        }
    }

    /// Time to sleep before the next poll
    fn next_wait(&self, backoff: &mut Duration, target_occurence: u32) -> Duration {
        if !self.poll_interval.is_zero() {
            return self.poll_interval;
        }

        // Keep the cadence steady while counting repeated target observations
        if target_occurence == 0 {
            *backoff = backoff.saturating_mul(2);
        }
        (*backoff).clamp(self.min_timeout.min(MAX_BACKOFF), MAX_BACKOFF)
    }

    /// Poll `refresh` until the observed state settles in the target set.
    ///
    /// Returns the final observation on success. Fails with
    /// [`CloudError::UnexpectedState`] as soon as a state outside both sets is
    /// seen, with [`CloudError::Timeout`] once the deadline passes, and with
    /// the refresh error itself if an observation fails. An observation still
    /// in flight at the deadline is dropped.
    pub async fn wait_for_state<T, E, F, Fut>(&self, mut refresh: F) -> Result<Observation<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>, E>>,
        E: From<CloudError>,
    {
        let deadline = Instant::now() + self.timeout;
        let required = self.continuous_target_occurence.max(1);
        let mut last_state = String::new();
        let mut target_occurence = 0u32;
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0u32;

        tracing::debug!(
            pending = ?self.pending,
            target = ?self.target,
            timeout = ?self.timeout,
            "Waiting for state"
        );

        if !self.delay.is_zero() && !sleep_before_deadline(self.delay, deadline).await {
            tracing::warn!(target = ?self.target, "Timed out before the first poll");
            return Err(self.timeout_error(&last_state).into());
        }

        loop {
            let observation = match timeout_at(deadline, refresh()).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(last_state = %last_state, target = ?self.target, "Timed out during poll");
                    return Err(self.timeout_error(&last_state).into());
                }
            };
            attempt += 1;
            last_state.clone_from(&observation.state);
            tracing::debug!(attempt, state = %observation.state, "Observed state");

            if self.is_target(&observation.state) {
                target_occurence += 1;
                if target_occurence >= required {
                    tracing::info!(state = %observation.state, attempt, "Reached target state");
                    return Ok(observation);
                }
            } else if self.is_pending(&observation.state) {
                target_occurence = 0;
            } else {
                tracing::warn!(
                    state = %observation.state,
                    target = ?self.target,
                    "Unexpected state"
                );
                return Err(CloudError::UnexpectedState {
                    state: observation.state,
                    expected: self.target.clone(),
                }
                .into());
            }

            let wait = self.next_wait(&mut backoff, target_occurence);
            if !sleep_before_deadline(wait, deadline).await {
                tracing::warn!(last_state = %last_state, target = ?self.target, "Timed out");
                return Err(self.timeout_error(&last_state).into());
            }
        }
    }
}

/// Sleep for `wait`, or until `deadline` if that comes first.
/// Returns false when the deadline was reached.
async fn sleep_before_deadline(wait: Duration, deadline: Instant) -> bool {
    let wake = Instant::now() + wait;
    if wake >= deadline {
        sleep_until(deadline).await;
        return false;
    }
    sleep(wait).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Refresh function that walks through `states`, repeating the last one
    fn scripted<'a>(
        states: &'a [&'a str],
        calls: &'a AtomicUsize,
    ) -> impl FnMut() -> std::future::Ready<Result<Observation<usize>, CloudError>> + 'a {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let state = states[n.min(states.len() - 1)];
            std::future::ready(Ok(Observation::new(n, state)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_then_active_twice() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["ACTIVE", "BACKING UP"], Duration::from_secs(600))
            .pending(["BUILD"])
            .poll_interval(Duration::from_secs(10))
            .continuous_target_occurence(2);

        let result = conf
            .wait_for_state(scripted(&["BUILD", "ACTIVE", "ACTIVE", "BACKING UP"], &calls))
            .await;

        let observation = assert_ok!(result);
        assert_eq!(observation.state, "ACTIVE");
        assert_eq!(observation.value, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_until_deleted() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["DELETED"], Duration::from_secs(600))
            .pending(["ACTIVE"])
            .delay(Duration::from_secs(15))
            .poll_interval(Duration::from_secs(5));

        let result = conf
            .wait_for_state(scripted(&["ACTIVE", "ACTIVE", "DELETED"], &calls))
            .await;

        assert_eq!(assert_ok!(result).state, "DELETED");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_target_needs_configured_occurrences() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(600))
            .poll_interval(Duration::from_secs(5))
            .continuous_target_occurence(3);

        let start = Instant::now();
        let result = conf.wait_for_state(scripted(&["ACTIVE"], &calls)).await;

        assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_occurrences_behaves_like_one() {
        let calls = AtomicUsize::new(0);
        let conf =
            StateChangeConf::new(["ACTIVE"], Duration::from_secs(60)).continuous_target_occurence(0);

        assert_ok!(conf.wait_for_state(scripted(&["ACTIVE"], &calls)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_resets_occurrence_counter() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(600))
            .pending(["BACKING UP"])
            .poll_interval(Duration::from_secs(5))
            .continuous_target_occurence(2);

        let states = ["ACTIVE", "BACKING UP", "ACTIVE", "ACTIVE"];
        assert_ok!(conf.wait_for_state(scripted(&states, &calls)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_state_fails_without_waiting() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(600))
            .pending(["BUILD"])
            .poll_interval(Duration::from_secs(10));

        let start = Instant::now();
        let result = conf
            .wait_for_state(scripted(&["BUILD", "FAILED"], &calls))
            .await;

        match assert_err!(result) {
            CloudError::UnexpectedState { state, expected } => {
                assert_eq!(state, "FAILED");
                assert_eq!(expected, vec!["ACTIVE".to_string()]);
            }
            other => panic!("expected UnexpectedState, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pending_fails_on_first_mismatch() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(600))
            .poll_interval(Duration::from_secs(5));

        let start = Instant::now();
        let result = conf.wait_for_state(scripted(&["MODIFYING"], &calls)).await;

        assert!(matches!(
            assert_err!(result),
            CloudError::UnexpectedState { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_within_one_interval() {
        let calls = AtomicUsize::new(0);
        let timeout = Duration::from_secs(35);
        let interval = Duration::from_secs(10);
        let conf = StateChangeConf::new(["ACTIVE"], timeout)
            .pending(["BUILD"])
            .poll_interval(interval);

        let start = Instant::now();
        let result = conf.wait_for_state(scripted(&["BUILD"], &calls)).await;
        let elapsed = start.elapsed();

        match assert_err!(result) {
            CloudError::Timeout { last_state, .. } => assert_eq!(last_state, "BUILD"),
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + interval);
        // polls at 0s, 10s, 20s, 30s
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_during_initial_delay() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(5))
            .delay(Duration::from_secs(20));

        let result = conf.wait_for_state(scripted(&["ACTIVE"], &calls)).await;

        assert!(matches!(assert_err!(result), CloudError::Timeout { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_refresh_is_cancelled_at_deadline() {
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(30));

        let start = Instant::now();
        let result = conf
            .wait_for_state(|| async {
                sleep(Duration::from_secs(3600)).await;
                Ok::<_, CloudError>(Observation::new((), "ACTIVE"))
            })
            .await;

        assert!(matches!(assert_err!(result), CloudError::Timeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_error_is_propagated() {
        let calls = AtomicUsize::new(0);
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(60)).pending(["BUILD"]);

        let result = conf
            .wait_for_state(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<Observation<()>, _>(CloudError::ResourceNotFound("db-1".to_string()))
                }
            })
            .await;

        assert!(matches!(
            assert_err!(result),
            CloudError::ResourceNotFound(id) if id == "db-1"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_without_poll_interval() {
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(60))
            .min_timeout(Duration::from_secs(1));
        let mut backoff = INITIAL_BACKOFF;

        // 200ms is raised to the 1s floor
        assert_eq!(conf.next_wait(&mut backoff, 0), Duration::from_secs(1));
        assert_eq!(conf.next_wait(&mut backoff, 0), Duration::from_secs(1));
        assert_eq!(conf.next_wait(&mut backoff, 0), Duration::from_secs(1));
        assert_eq!(conf.next_wait(&mut backoff, 0), Duration::from_millis(1600));
        // unchanged while counting target occurrences
        assert_eq!(conf.next_wait(&mut backoff, 1), Duration::from_millis(1600));

        for _ in 0..10 {
            conf.next_wait(&mut backoff, 0);
        }
        assert_eq!(conf.next_wait(&mut backoff, 0), MAX_BACKOFF);
    }

    #[test]
    fn test_poll_interval_overrides_backoff() {
        let conf = StateChangeConf::new(["ACTIVE"], Duration::from_secs(60))
            .poll_interval(Duration::from_secs(3));
        let mut backoff = INITIAL_BACKOFF;
        assert_eq!(conf.next_wait(&mut backoff, 0), Duration::from_secs(3));
    }
}
