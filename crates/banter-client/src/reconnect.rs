//! Reconnect state machine.
//!
//! A pure transition function over explicit states, driven by the client's
//! connect loop. Retries use a fixed delay and give up for good after a
//! fixed number of consecutive failures; a successful connection resets the
//! counter.

use std::time::Duration;

/// Reconnection policy: fixed delay between attempts, bounded attempt count.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Wait between reconnection attempts.
    pub delay: Duration,
    /// Give up after this many consecutive failed attempts.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_attempts: 5,
        }
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Not connected. Terminal once the retry budget is spent.
    Disconnected,
    /// A connection attempt is in flight. `attempt` is 0 for the initial
    /// connect and counts retries after that.
    Connecting { attempt: u32 },
    /// Live connection established.
    Connected,
    /// Waiting out the retry delay before attempt number `attempt`.
    Reconnecting { attempt: u32 },
}

/// Events fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    /// The caller asked to open the connection.
    Open,
    /// A connection attempt succeeded.
    Established,
    /// The connection closed or errored, or an attempt failed.
    Lost,
    /// The retry delay elapsed.
    RetryElapsed,
}

impl ConnState {
    /// Advance the machine by one event.
    ///
    /// Events that do not apply to the current state leave it unchanged.
    #[must_use]
    pub fn step(self, event: ConnEvent, policy: &ReconnectPolicy) -> ConnState {
        match (self, event) {
            (ConnState::Disconnected, ConnEvent::Open) => ConnState::Connecting { attempt: 0 },

            (ConnState::Connecting { .. }, ConnEvent::Established) => ConnState::Connected,

            (ConnState::Connecting { attempt }, ConnEvent::Lost) => {
                if attempt >= policy.max_attempts {
                    ConnState::Disconnected
                } else {
                    ConnState::Reconnecting {
                        attempt: attempt + 1,
                    }
                }
            }

            (ConnState::Connected, ConnEvent::Lost) => ConnState::Reconnecting { attempt: 1 },

            (ConnState::Reconnecting { attempt }, ConnEvent::RetryElapsed) => {
                ConnState::Connecting { attempt }
            }

            (state, _) => state,
        }
    }

    /// Whether the machine has given up for good.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnState::Disconnected)
    }
}
