//! The connection supervisor (§4.6): `Idle → Connecting → Connected →
//! Draining → Backoff → Connecting`, with bounded-exponential backoff
//! and jitter.
//!
//! Grounded on the teacher's `agent.rs::run_agent_loop` — a flat
//! `loop { connect; process; sleep(3s); }` with no backoff and no
//! explicit states. This generalizes that shape into the state machine
//! §4.6 names: the `session` closure plays the role of the teacher's
//! inline "process messages until disconnect" block (its `Connected`
//! state), draining (failing pending work, closing sub-streams) happens
//! inside `session` itself before it returns, and the fixed 3s sleep
//! becomes the bounded-exponential-backoff-with-jitter formula of §4.6.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SupervisorError;

/// `delay = min(max_delay, prev_delay * factor * jitter)`, initial 1s,
/// factor 1.5, max 120s, jitter in [0.8, 1.2], ceiling 100 consecutive
/// failed attempts (§4.6).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
    pub jitter: (f64, f64),
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 1.5,
            max: Duration::from_secs(120),
            jitter: (0.8, 1.2),
            max_attempts: 100,
        }
    }
}

impl BackoffPolicy {
    fn next_delay(&self, prev: Duration) -> Duration {
        let jitter = rand::thread_rng().gen_range(self.jitter.0..=self.jitter.1);
        let candidate = prev.mul_f64(self.factor * jitter);
        candidate.min(self.max)
    }
}

pub type ClientWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drives the supervisor state machine for one control-channel url.
/// `session` is invoked once per successful connection (the
/// `Connecting → Connected` transition) and is expected to run until
/// the channel ends, performing its own `Draining` cleanup (failing
/// pending requests, closing sub-streams) before returning — the
/// supervisor only owns reconnection timing and cancellation, not
/// protocol-specific state.
pub async fn run<S, F>(url: &str, cancel: CancellationToken, policy: BackoffPolicy, mut session: S) -> Result<(), SupervisorError>
where
    S: FnMut(ClientWebSocket) -> F,
    F: Future<Output = ()>,
{
    let mut consecutive_failures: u32 = 0;
    let mut delay = policy.initial;

    loop {
        if cancel.is_cancelled() {
            info!("supervisor stopping: cancellation requested");
            return Ok(());
        }

        info!("connecting to {url}");
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("supervisor stopping: cancellation requested while connecting");
                return Ok(());
            }
            result = connect_async(url) => result,
        };

        match connected {
            Ok((stream, _response)) => {
                info!("connected to {url}");
                consecutive_failures = 0;
                delay = policy.initial;

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("supervisor stopping: cancellation requested mid-session");
                        return Ok(());
                    }
                    _ = session(stream) => {}
                }
                warn!("control channel to {url} ended; backing off before reconnecting");
            }
            Err(err) => {
                consecutive_failures += 1;
                warn!("connection to {url} failed ({consecutive_failures} consecutive failures): {err}");
            }
        }

        if consecutive_failures >= policy.max_attempts {
            return Err(SupervisorError::AttemptsExceeded(policy.max_attempts));
        }

        let wait = delay;
        delay = policy.next_delay(delay);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("supervisor stopping: cancellation requested during backoff");
                return Ok(());
            }
            _ = sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_never_exceeds_the_configured_maximum() {
        let policy = BackoffPolicy::default();
        let mut delay = policy.initial;
        for _ in 0..50 {
            delay = policy.next_delay(delay);
            assert!(delay <= policy.max);
        }
    }

    #[test]
    fn next_delay_is_monotonically_non_decreasing_in_expectation() {
        let policy = BackoffPolicy::default();
        // at the midpoint of the jitter range, growth is strictly positive
        // until the ceiling is hit.
        let mid_jitter = (policy.jitter.0 + policy.jitter.1) / 2.0;
        let mut delay = policy.initial;
        loop {
            let next = delay.mul_f64(policy.factor * mid_jitter).min(policy.max);
            if next <= delay {
                assert_eq!(next, policy.max);
                break;
            }
            delay = next;
        }
    }
}
