//! Connection lifecycle bookkeeping for the live channel.
//!
//! [`Supervisor`] owns the connection state, the reconnect-attempt counter
//! and the last-liveness timestamp. It never touches a socket and takes the
//! current time as an argument, so every transition is driven explicitly by
//! the async loop in [`super::ws`] and can be exercised directly in tests.
//!
//! ```text
//!            begin_connect            on_open
//!   Closed ───────────────> Connecting ──────> Open
//!     ^                          │               │
//!     │         on_close         │   on_close /  │
//!     └──────────────────────────┴── is_dead ────┘
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Connecting,
    Open,
    Closed,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Heartbeat and backoff tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// How often the client sends a ping.
    pub ping_interval: Duration,
    /// Missed intervals before an open connection is declared dead.
    pub dead_after_missed: u32,
    /// Delay before the first reconnect attempt.
    pub base_backoff: Duration,
    /// Upper bound for any reconnect delay.
    pub max_backoff: Duration,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            dead_after_missed: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl SupervisorConfig {
    /// Silence longer than this means the connection is a zombie.
    pub fn dead_after(&self) -> Duration {
        self.ping_interval * self.dead_after_missed
    }

    /// Delay before reconnect `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// What the driver should do after a connection closed or failed to open.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconnect {
    After { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Snapshot published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: LinkState,
    pub attempt: u32,
    pub last_liveness: Option<Instant>,
    /// Retries ran out; only a manual reconnect leaves this state.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    config: SupervisorConfig,
    state: LinkState,
    attempt: u32,
    last_liveness: Option<Instant>,
    exhausted: bool,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            state: LinkState::Closed,
            attempt: 0,
            last_liveness: None,
            exhausted: false,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            attempt: self.attempt,
            last_liveness: self.last_liveness,
            exhausted: self.exhausted,
        }
    }

    pub fn begin_connect(&mut self) {
        self.state = LinkState::Connecting;
    }

    /// The socket opened: backoff resets and the liveness clock starts.
    pub fn on_open(&mut self, now: Instant) {
        self.state = LinkState::Open;
        self.attempt = 0;
        self.exhausted = false;
        self.last_liveness = Some(now);
    }

    /// Any frame that proves the server is alive.
    pub fn on_liveness(&mut self, now: Instant) {
        if self.state == LinkState::Open {
            self.last_liveness = Some(now);
        }
    }

    /// An open connection that has been silent past the threshold.
    pub fn is_dead(&self, now: Instant) -> bool {
        match (self.state, self.last_liveness) {
            (LinkState::Open, Some(last)) => now.saturating_duration_since(last) > self.config.dead_after(),
            _ => false,
        }
    }

    /// The connection closed (or never opened). Decide whether and when to
    /// try again.
    pub fn on_close(&mut self) -> Reconnect {
        self.state = LinkState::Closed;
        if self.attempt >= self.config.max_attempts {
            self.exhausted = true;
            return Reconnect::GiveUp {
                attempts: self.attempt,
            };
        }
        self.attempt += 1;
        Reconnect::After {
            attempt: self.attempt,
            delay: self.config.backoff_delay(self.attempt),
        }
    }

    /// Manual reconnect: forget all backoff history.
    pub fn manual_reset(&mut self) {
        self.attempt = 0;
        self.exhausted = false;
        self.state = LinkState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            ping_interval: Duration::from_secs(10),
            dead_after_missed: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            max_attempts: 10,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = config();
        assert_eq!(cfg.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(cfg.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(cfg.backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(cfg.backoff_delay(5), Duration::from_secs(8));
        assert_eq!(cfg.backoff_delay(9), Duration::from_secs(8));
        assert_eq!(cfg.backoff_delay(64), Duration::from_secs(8));
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut sup = Supervisor::new(config());
        sup.on_close();
        sup.on_close();
        assert_eq!(sup.attempt(), 2);

        sup.begin_connect();
        sup.on_open(Instant::now());
        assert_eq!(sup.state(), LinkState::Open);
        assert_eq!(sup.attempt(), 0);
    }

    #[test]
    fn test_liveness_keeps_connection_alive() {
        let mut sup = Supervisor::new(config());
        let t0 = Instant::now();
        sup.on_open(t0);
        sup.on_liveness(t0 + Duration::from_secs(25));
        assert!(!sup.is_dead(t0 + Duration::from_secs(50)));
        assert!(sup.is_dead(t0 + Duration::from_secs(56)));
    }

    #[test]
    fn test_silent_connection_is_dead_and_reconnects_with_min_backoff() {
        let mut sup = Supervisor::new(config());
        let t0 = Instant::now();
        sup.begin_connect();
        sup.on_open(t0);

        assert!(!sup.is_dead(t0 + Duration::from_secs(30)));
        assert!(sup.is_dead(t0 + Duration::from_secs(31)));

        let decision = sup.on_close();
        assert_eq!(
            decision,
            Reconnect::After {
                attempt: 1,
                delay: Duration::from_millis(500),
            }
        );
        assert_eq!(sup.state(), LinkState::Closed);
    }

    #[test]
    fn test_closed_connection_is_never_dead() {
        let sup = Supervisor::new(config());
        assert!(!sup.is_dead(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_gives_up_after_max_attempts_and_manual_reset_recovers() {
        let mut sup = Supervisor::new(config());
        sup.on_open(Instant::now());

        // Initial drop schedules attempt 1; attempts 1..=10 then all fail.
        for expected in 1..=10 {
            match sup.on_close() {
                Reconnect::After { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("Expected retry, got {:?}", other),
            }
            sup.begin_connect();
        }
        assert_eq!(sup.on_close(), Reconnect::GiveUp { attempts: 10 });
        assert!(sup.is_exhausted());
        assert!(sup.status().exhausted);

        sup.manual_reset();
        assert_eq!(sup.attempt(), 0);
        assert!(!sup.is_exhausted());
        sup.begin_connect();
        assert_eq!(sup.state(), LinkState::Connecting);
    }

    #[test]
    fn test_zero_max_attempts_gives_up_immediately() {
        let mut sup = Supervisor::new(SupervisorConfig {
            max_attempts: 0,
            ..config()
        });
        assert_eq!(sup.on_close(), Reconnect::GiveUp { attempts: 0 });
    }

    #[test]
    fn test_link_state_serialization() {
        assert_eq!(LinkState::Open.as_str(), "open");
        assert_eq!(
            serde_json::to_string(&LinkState::Connecting).unwrap(),
            "\"connecting\""
        );
    }
}
