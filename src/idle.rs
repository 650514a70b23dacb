//! Network idle detection
//!
//! A page counts as rendered once its outstanding network requests have
//! settled for a short quiet window, mirroring the `networkidle0` /
//! `networkidle2` heuristics of browser automation tools, but bounded by
//! an explicit timeout.

use std::collections::HashSet;
use std::future::pending;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::{Instant, sleep_until};

/// When to consider a page's network activity finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// Upper bound on the whole wait. Reaching it is not an error: the page
    /// is exported as rendered so far.
    pub timeout: Duration,
    /// How long the in-flight count must stay at or below `max_inflight`.
    pub quiet_window: Duration,
    /// Requests still allowed in flight while idle. 0 matches `networkidle0`.
    pub max_inflight: usize,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            quiet_window: Duration::from_millis(500),
            max_inflight: 0,
        }
    }
}

/// Request lifecycle notifications, keyed by request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Started(String),
    Finished(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    Idle,
    /// The event source closed, typically because the page went away.
    StreamEnded,
    TimedOut { in_flight: usize },
}

pub async fn wait_for_network_idle<S>(mut events: S, policy: &IdlePolicy) -> IdleOutcome
where
    S: Stream<Item = NetworkEvent> + Unpin,
{
    let deadline = Instant::now() + policy.timeout;
    let mut in_flight: HashSet<String> = HashSet::new();
    // Armed while the in-flight count is within the limit. Only crossing the
    // limit in either direction touches it.
    let mut quiet_until = Some(Instant::now() + policy.quiet_window);

    loop {
        let armed = quiet_until;
        let quiet = async move {
            match armed {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            event = events.next() => {
                match event {
                    Some(NetworkEvent::Started(id)) => {
                        in_flight.insert(id);
                    }
                    Some(NetworkEvent::Finished(id)) => {
                        in_flight.remove(&id);
                    }
                    None => return IdleOutcome::StreamEnded,
                }

                let within_limit = in_flight.len() <= policy.max_inflight;
                match (within_limit, quiet_until) {
                    (true, None) => quiet_until = Some(Instant::now() + policy.quiet_window),
                    (false, Some(_)) => quiet_until = None,
                    _ => {}
                }
            }
            _ = quiet => return IdleOutcome::Idle,
            _ = sleep_until(deadline) => {
                return IdleOutcome::TimedOut { in_flight: in_flight.len() };
            }
        }
    }
}
