//! Cooperative rate-limit gate.
//!
//! The gate tracks the last known upstream rate-limit status and the number
//! of scans currently in flight. Before starting a scan, [`RateLimitGate::reserve`]
//! takes one unit of the budget or blocks until either another request
//! finishes or the upstream reset window elapses. After every scan,
//! [`RateLimitGate::finish`] releases the slot and merges the freshly
//! observed headers conservatively, so concurrently completing requests
//! never roll the remaining budget forward.
//!
//! At startup, before any real headers have been seen, the state is seeded
//! with a synthetic `{limit: 1, remaining: 1}` budget and a far-future
//! reset. That admits exactly one probe request whose response headers
//! teach the gate the real budget.
//!
//! The mutex is never held across an await; waiting happens on a
//! [`Notify`] whose signals are coalesced, plus a per-waiter timer on the
//! reset instant while it lies ahead. Once the reset has passed, only a
//! `finish` can free budget, and every scan calls `finish` on completion
//! or failure, so a parked waiter is always woken.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use lookout_core::{Error, Kind};
use lookout_provider::RateLimitStatus;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct GateState {
    /// Most recent view of the upstream rate-limit headers; `None` until
    /// the first request is seeded or a response is observed.
    last_status: Option<RateLimitStatus>,
    /// Number of scans currently executing.
    in_flight: u32,
}

/// In-process gate enforcing the provider's remaining request budget
/// across all concurrent worker jobs.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    state: Mutex<GateState>,
    wake: Notify,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one unit of the rate-limit budget, blocking until a unit is
    /// available. Returns an error only when `cancel` fires while waiting.
    ///
    /// The effective remaining budget is the reported `remaining`, or the
    /// full `limit` once the reset instant has passed. A reservation is
    /// granted while `remaining - in_flight > 0`.
    ///
    /// A timer is armed only while the reset instant is still ahead. Once
    /// the window has lapsed the budget is already refilled, so a saturated
    /// gate can only change through a `finish` (slot freed or a newer
    /// window adopted), and the waiter parks on the wake signal alone.
    pub async fn reserve(&self, cancel: &CancellationToken) -> Result<(), Error> {
        loop {
            let reset_at = {
                let mut state = self.state.lock().unwrap();

                if state.last_status.is_none() {
                    // Allow a single probe so real headers can be learned.
                    state.last_status = Some(RateLimitStatus {
                        limit: 1,
                        remaining: 1,
                        reset_at: Utc::now() + chrono::Duration::days(365),
                    });
                }
                let status = state.last_status.unwrap();

                let remaining = if Utc::now() > status.reset_at {
                    // The window has elapsed and is assumed refilled.
                    status.limit
                } else {
                    status.remaining
                };

                if remaining > state.in_flight {
                    state.in_flight += 1;
                    tracing::debug!(
                        remaining,
                        limit = status.limit,
                        in_flight = state.in_flight,
                        "reserved rate limit slot",
                    );
                    return Ok(());
                }

                tracing::debug!(
                    remaining,
                    limit = status.limit,
                    in_flight = state.in_flight,
                    reset_at = %status.reset_at,
                    "waiting for rate limit slot",
                );
                status.reset_at
            };

            let until_reset = (reset_at - Utc::now())
                .to_std()
                .ok()
                .filter(|d| !d.is_zero());

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::new(
                        Kind::Unavailable,
                        "cancelled while waiting for rate limit",
                    ));
                }
                // Another request finished; re-evaluate the budget.
                _ = self.wake.notified() => {}
                // Reset window elapsed; the budget refills to the limit.
                _ = wait_for_reset(until_reset) => {}
            }
        }
    }

    /// Release a slot after a scan attempt and merge the freshly observed
    /// rate-limit status.
    ///
    /// Merge rules: a response without headers changes nothing; the first
    /// observation is adopted; a new reset instant always wins (it is the
    /// freshest truth); within the same window only a lower `remaining` is
    /// adopted, so out-of-order responses cannot overshoot the budget.
    pub fn finish(&self, status: Option<RateLimitStatus>) {
        let mut state = self.state.lock().unwrap();

        state.in_flight = state.in_flight.saturating_sub(1);
        // Wake at most one waiter; the permit is stored if none is parked.
        self.wake.notify_one();

        let Some(new) = status else { return };

        let adopt = match state.last_status {
            None => true,
            Some(last) => new.reset_at != last.reset_at || new.remaining < last.remaining,
        };
        if adopt {
            state.last_status = Some(new);
            tracing::debug!(
                limit = new.limit,
                remaining = new.remaining,
                reset_at = %new.reset_at,
                in_flight = state.in_flight,
                "adopted rate limit status",
            );
        }
    }
}

/// Sleep until the reset instant, or forever when it already passed.
async fn wait_for_reset(until_reset: Option<Duration>) {
    match until_reset {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::time::timeout;

    fn status(limit: u32, remaining: u32, reset_in: chrono::Duration) -> RateLimitStatus {
        RateLimitStatus {
            limit,
            remaining,
            reset_at: Utc::now() + reset_in,
        }
    }

    /// Install a status without affecting in-flight accounting.
    fn seed(gate: &RateLimitGate, s: RateLimitStatus) {
        gate.state.lock().unwrap().last_status = Some(s);
    }

    fn in_flight(gate: &RateLimitGate) -> u32 {
        gate.state.lock().unwrap().in_flight
    }

    async fn assert_blocks(gate: &RateLimitGate) {
        let cancel = CancellationToken::new();
        let blocked = timeout(Duration::from_millis(50), gate.reserve(&cancel)).await;
        assert!(blocked.is_err(), "reservation should have blocked");
    }

    #[tokio::test]
    async fn startup_admits_exactly_one_probe() {
        let gate = RateLimitGate::new();
        let cancel = CancellationToken::new();

        gate.reserve(&cancel).await.unwrap();
        assert_eq!(in_flight(&gate), 1);

        // No headers observed yet: the second request must wait for the
        // probe to finish.
        assert_blocks(&gate).await;
    }

    #[tokio::test]
    async fn admits_up_to_remaining_then_blocks_extra() {
        let gate = Arc::new(RateLimitGate::new());
        seed(&gate, status(2, 2, chrono::Duration::minutes(1)));
        let cancel = CancellationToken::new();

        gate.reserve(&cancel).await.unwrap();
        gate.reserve(&cancel).await.unwrap();
        assert_eq!(in_flight(&gate), 2);
        assert_blocks(&gate).await;

        // One finishes; the blocked request proceeds promptly.
        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.reserve(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.finish(Some(status(2, 2, chrono::Duration::minutes(1))));

        timeout(Duration::from_millis(50), waiter)
            .await
            .expect("waiter should be woken within 50ms")
            .unwrap()
            .unwrap();
        assert_eq!(in_flight(&gate), 2);
    }

    #[tokio::test]
    async fn waits_for_reset_when_remaining_is_zero() {
        let gate = RateLimitGate::new();
        seed(&gate, status(1, 0, chrono::Duration::milliseconds(300)));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        gate.reserve(&cancel).await.unwrap();

        // Granted only after the window reset refilled the budget.
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(in_flight(&gate), 1);
    }

    #[tokio::test]
    async fn lapsed_window_parks_on_the_wake_signal() {
        // Limit 1, reset long past: the budget is "refilled" but fully
        // consumed by the in-flight request, so the waiter has no timer to
        // arm and must sit on the wake signal instead of spinning.
        let gate = Arc::new(RateLimitGate::new());
        seed(&gate, status(1, 0, chrono::Duration::minutes(-5)));
        let cancel = CancellationToken::new();

        gate.reserve(&cancel).await.unwrap();
        assert_eq!(in_flight(&gate), 1);
        assert_blocks(&gate).await;

        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.reserve(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.finish(None);

        timeout(Duration::from_millis(50), waiter)
            .await
            .expect("waiter should be woken by the finish")
            .unwrap()
            .unwrap();
        assert_eq!(in_flight(&gate), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_a_blocked_reservation() {
        let gate = RateLimitGate::new();
        seed(&gate, status(1, 0, chrono::Duration::minutes(5)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gate.reserve(&cancel).await.unwrap_err();
        assert!(err.is(Kind::Unavailable));
        assert_eq!(in_flight(&gate), 0);
    }

    #[tokio::test]
    async fn finish_unblocks_after_failures_too() {
        let gate = Arc::new(RateLimitGate::new());
        let cancel = CancellationToken::new();

        // Probe reserved, then fails without returning headers.
        gate.reserve(&cancel).await.unwrap();
        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.reserve(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.finish(None);

        timeout(Duration::from_millis(50), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn merge_prefers_lower_remaining_within_same_window() {
        let gate = RateLimitGate::new();
        let reset_at = Utc::now() + chrono::Duration::minutes(1);
        let low = RateLimitStatus {
            limit: 60,
            remaining: 3,
            reset_at,
        };
        let high = RateLimitStatus {
            limit: 60,
            remaining: 40,
            reset_at,
        };

        gate.finish(Some(low));
        // An out-of-order, more optimistic report must not win.
        gate.finish(Some(high));
        assert_eq!(gate.state.lock().unwrap().last_status, Some(low));
    }

    #[tokio::test]
    async fn merge_adopts_a_new_window_unconditionally() {
        let gate = RateLimitGate::new();
        let old = status(60, 2, chrono::Duration::minutes(1));
        gate.finish(Some(old));

        let fresh = status(60, 59, chrono::Duration::minutes(2));
        gate.finish(Some(fresh));
        assert_eq!(gate.state.lock().unwrap().last_status, Some(fresh));
    }

    #[tokio::test]
    async fn merge_ignores_responses_without_headers() {
        let gate = RateLimitGate::new();
        let known = status(60, 10, chrono::Duration::minutes(1));
        gate.finish(Some(known));

        gate.finish(None);
        assert_eq!(gate.state.lock().unwrap().last_status, Some(known));
    }
}
