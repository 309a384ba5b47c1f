//! Broker connection with retry while the broker is still starting up.
//!
//! The retry loop is an explicit state machine:
//!
//! ```text
//! Idle -> Dialing -> Connected
//!            |
//!            v
//!         Retrying -> Dialing ...
//!            |
//!            v (backoff exhausted)
//!          Failed
//! ```
//!
//! Delays come from any `backon::Backoff`; the default is [`QuadraticBackoff`],
//! which waits `n²` seconds before attempt `n` and gives up after the sixth
//! failed dial.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::Backoff;
use tracing::{error, info, warn};

/// Failed dials tolerated before the connector gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Non-jittered quadratic backoff: `unit × n²` before retry `n`.
///
/// With the defaults this yields 1s, 4s, 9s, 16s, 25s and is then exhausted.
#[derive(Debug, Clone)]
pub struct QuadraticBackoff {
    unit: Duration,
    max_retries: u32,
    attempt: u32,
}

impl QuadraticBackoff {
    /// Backoff allowing `max_retries` retries after the first dial.
    pub fn new(max_retries: u32) -> Self {
        Self {
            unit: Duration::from_secs(1),
            max_retries,
            attempt: 0,
        }
    }

    /// Scale every delay by `unit` instead of one second.
    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// Delay before dial attempt `attempt` (0-indexed). Attempt 0 never waits.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(attempt.saturating_mul(attempt))
    }
}

impl Default for QuadraticBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl Iterator for QuadraticBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(self.delay_for_attempt(self.attempt))
    }
}

/// Where the connector currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// Nothing attempted yet.
    Idle,
    /// Dial `attempt` (0-indexed) in flight.
    Dialing { attempt: u32 },
    /// Last dial failed; sleep `delay` before the next one.
    Retrying { failures: u32, delay: Duration },
    /// Connection established after `attempts` dials.
    Connected { attempts: u32 },
    /// Backoff exhausted; the last error is terminal.
    Failed { failures: u32 },
}

/// Attempt bookkeeping for a single connect operation.
#[derive(Debug)]
pub struct ConnectMachine<B = QuadraticBackoff> {
    state: ConnectState,
    backoff: B,
    failures: u32,
}

impl<B: Backoff> ConnectMachine<B> {
    pub fn new(backoff: B) -> Self {
        Self {
            state: ConnectState::Idle,
            backoff,
            failures: 0,
        }
    }

    pub fn state(&self) -> ConnectState {
        self.state
    }

    /// Begin the next dial. Only valid from `Idle` or `Retrying`.
    pub fn dial(&mut self) -> ConnectState {
        if matches!(
            self.state,
            ConnectState::Idle | ConnectState::Retrying { .. }
        ) {
            self.state = ConnectState::Dialing {
                attempt: self.failures,
            };
        }
        self.state
    }

    /// Record a successful dial.
    pub fn dial_succeeded(&mut self) -> ConnectState {
        if let ConnectState::Dialing { attempt } = self.state {
            self.state = ConnectState::Connected {
                attempts: attempt + 1,
            };
        }
        self.state
    }

    /// Record a failed dial; moves to `Retrying` or, once the backoff is spent, `Failed`.
    pub fn dial_failed(&mut self) -> ConnectState {
        if let ConnectState::Dialing { .. } = self.state {
            self.failures += 1;
            self.state = match self.backoff.next() {
                Some(delay) => ConnectState::Retrying {
                    failures: self.failures,
                    delay,
                },
                None => ConnectState::Failed {
                    failures: self.failures,
                },
            };
        }
        self.state
    }
}

/// Dial until success or until `backoff` is exhausted.
///
/// # Arguments
/// * `target` - Human-readable name for logging (never include credentials)
/// * `backoff` - Delays between failed dials
/// * `dial` - Async function that attempts one connection
///
/// # Returns
/// The connection on success, or the last dial error once the backoff runs out.
pub async fn connect_with_retry<T, E, B, F, Fut>(target: &str, backoff: B, mut dial: F) -> Result<T, E>
where
    E: Display,
    B: Backoff,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut machine = ConnectMachine::new(backoff);
    let mut attempt = 0;
    machine.dial();

    loop {
        match dial().await {
            Ok(connection) => {
                machine.dial_succeeded();
                info!(target = %target, attempt = attempt + 1, "Connected to broker");
                return Ok(connection);
            }
            Err(e) => match machine.dial_failed() {
                ConnectState::Retrying { failures, delay } => {
                    warn!(
                        target = %target,
                        failures,
                        retry_in = ?delay,
                        error = %e,
                        "Broker not yet ready"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = failures;
                    machine.dial();
                }
                _ => {
                    error!(
                        target = %target,
                        attempts = attempt + 1,
                        error = %e,
                        "Giving up connecting to broker"
                    );
                    return Err(e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_quadratic_delays() {
        let backoff = QuadraticBackoff::default();
        let delays: Vec<u64> = (0..=5)
            .map(|n| backoff.delay_for_attempt(n).as_secs())
            .collect();
        assert_eq!(delays, vec![0, 1, 4, 9, 16, 25]);
    }

    #[test]
    fn test_quadratic_backoff_exhausts_after_max_retries() {
        let delays: Vec<Duration> = QuadraticBackoff::default().collect();
        assert_eq!(
            delays,
            [1, 4, 9, 16, 25].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_machine_connects_first_try() {
        let mut machine = ConnectMachine::new(QuadraticBackoff::default());
        assert_eq!(machine.state(), ConnectState::Idle);
        assert_eq!(machine.dial(), ConnectState::Dialing { attempt: 0 });
        assert_eq!(
            machine.dial_succeeded(),
            ConnectState::Connected { attempts: 1 }
        );
        // Terminal: further dials do nothing
        assert_eq!(machine.dial(), ConnectState::Connected { attempts: 1 });
    }

    #[test]
    fn test_machine_retries_then_fails_on_sixth_failure() {
        let mut machine = ConnectMachine::new(QuadraticBackoff::default());

        for n in 1..=5u32 {
            machine.dial();
            assert_eq!(
                machine.dial_failed(),
                ConnectState::Retrying {
                    failures: n,
                    delay: Duration::from_secs(u64::from(n * n)),
                }
            );
        }

        assert_eq!(machine.dial(), ConnectState::Dialing { attempt: 5 });
        assert_eq!(machine.dial_failed(), ConnectState::Failed { failures: 6 });
        assert_eq!(machine.dial(), ConnectState::Failed { failures: 6 });
    }

    #[test]
    fn test_machine_ignores_out_of_order_events() {
        let mut machine = ConnectMachine::new(QuadraticBackoff::default());
        assert_eq!(machine.dial_failed(), ConnectState::Idle);
        assert_eq!(machine.dial_succeeded(), ConnectState::Idle);
    }

    #[test]
    fn test_machine_accepts_any_backon_backoff() {
        use backon::{BackoffBuilder, ConstantBuilder};

        let backoff = ConstantBuilder::default()
            .with_delay(Duration::from_millis(10))
            .with_max_times(1)
            .build();
        let mut machine = ConnectMachine::new(backoff);

        machine.dial();
        assert!(matches!(
            machine.dial_failed(),
            ConnectState::Retrying { failures: 1, .. }
        ));
        machine.dial();
        assert_eq!(machine.dial_failed(), ConnectState::Failed { failures: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_waits_quadratically() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<&str, String> =
            connect_with_retry("broker", QuadraticBackoff::default(), || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("refused".to_string())
                    } else {
                        Ok("connection")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "connection");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s before attempt 1, 4s before attempt 2
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<(), String> =
            connect_with_retry("broker", QuadraticBackoff::default(), || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("refused #{}", n))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "refused #5");
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        // No wait after the final failure
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 4 + 9 + 16 + 25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_retry_without_retries_dials_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<(), String> =
            connect_with_retry("broker", QuadraticBackoff::new(0), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("refused".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "refused");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
