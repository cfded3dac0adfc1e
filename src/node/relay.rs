use crate::model::{Envelope, LinkStatus, NodeId};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the upstream link of a node stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for the backoff timer before retry `attempt`.
    Retrying { attempt: u32 },
    /// Too many consecutive failures; only a new token re-arms the link.
    CircuitOpen,
}

impl RelayState {
    pub fn label(&self) -> &'static str {
        match self {
            RelayState::Disconnected => "disconnected",
            RelayState::Connecting => "connecting",
            RelayState::Connected => "connected",
            RelayState::Retrying { .. } => "retrying",
            RelayState::CircuitOpen => "circuit_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Upper bound of the wait before retry `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Full jitter: uniform in `[0, ceiling(attempt)]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.ceiling(attempt).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
    }
}

/// What happens after an established or pending link goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay disconnected until someone supplies a token again.
    #[default]
    Manual,
    Backoff(BackoffPolicy),
}

/// Outcome of `EdgeRelay::on_link_lost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLoss {
    /// The event belongs to a superseded link.
    Stale,
    Down,
    RetryIn { delay: Duration, attempt: u32 },
    CircuitOpened,
}

/// A message read off the upstream link, sorted by where it has to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamMessage {
    /// Our own envelope coming back from the hub.
    SelfEcho(String),
    /// Content of another node's envelope.
    Relayed(String),
    /// Anything the hub sent unwrapped.
    Direct(String),
}

/// Upstream side of an edge node.
///
/// Pure state: the node loop performs the I/O and feeds the outcomes back in.
/// Every link attempt gets a generation number, and events carrying an older
/// generation are ignored.
#[derive(Debug)]
pub struct EdgeRelay {
    node_id: NodeId,
    state: RelayState,
    token: Option<String>,
    generation: u64,
    policy: ReconnectPolicy,
    failures: u32,
}

impl EdgeRelay {
    pub fn new(node_id: NodeId, policy: ReconnectPolicy) -> Self {
        EdgeRelay {
            node_id,
            state: RelayState::Disconnected,
            token: None,
            generation: 0,
            policy,
            failures: 0,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.state == RelayState::Connected
    }

    pub fn status(&self) -> LinkStatus {
        if self.is_connected() {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }

    /// Start a fresh attempt with `token`; any previous link is superseded.
    pub fn begin_connect(&mut self, token: String) -> u64 {
        self.generation += 1;
        self.state = RelayState::Connecting;
        self.token = Some(token);
        self.failures = 0;
        info!(node_id = %self.node_id, generation = self.generation, "Connecting upstream");
        self.generation
    }

    /// Fire the retry scheduled for `generation`, returning the new
    /// generation and the token to use.
    pub fn begin_retry(&mut self, generation: u64) -> Option<(u64, String)> {
        if !self.is_current(generation) || !matches!(self.state, RelayState::Retrying { .. }) {
            return None;
        }
        let token = self.token.clone()?;
        self.generation += 1;
        self.state = RelayState::Connecting;
        debug!(generation = self.generation, attempt = self.failures, "Retrying upstream");
        Some((self.generation, token))
    }

    pub fn on_accepted(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.state = RelayState::Connected;
        self.failures = 0;
        info!(node_id = %self.node_id, "Connected upstream");
        true
    }

    /// The hub refused the token. Never retried.
    pub fn on_rejected(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        warn!(node_id = %self.node_id, "Upstream rejected the session token");
        self.state = RelayState::Disconnected;
        self.token = None;
        self.failures = 0;
        true
    }

    /// The link closed, errored, or could not be opened.
    pub fn on_link_lost(&mut self, generation: u64) -> LinkLoss {
        if !self.is_current(generation) {
            return LinkLoss::Stale;
        }
        match self.policy {
            ReconnectPolicy::Manual => {
                self.state = RelayState::Disconnected;
                LinkLoss::Down
            }
            ReconnectPolicy::Backoff(backoff) => {
                self.failures += 1;
                if self.failures > backoff.max_attempts {
                    warn!(failures = self.failures, "Opening upstream circuit");
                    self.state = RelayState::CircuitOpen;
                    self.token = None;
                    return LinkLoss::CircuitOpened;
                }
                let attempt = self.failures;
                self.state = RelayState::Retrying { attempt };
                LinkLoss::RetryIn {
                    delay: backoff.delay(attempt),
                    attempt,
                }
            }
        }
    }

    /// Envelope for a local viewer message, only while connected.
    pub fn wrap_outbound(&self, raw: &str) -> Option<Envelope> {
        self.is_connected()
            .then(|| Envelope::wrap(&self.node_id, raw))
    }

    pub fn classify(&self, raw: &str) -> UpstreamMessage {
        match Envelope::from_wire(raw) {
            Some(envelope) if envelope.is_from(&self.node_id) => {
                UpstreamMessage::SelfEcho(envelope.content)
            }
            Some(envelope) => UpstreamMessage::Relayed(envelope.content),
            None => UpstreamMessage::Direct(raw.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::Backoff(BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
            max_attempts,
        })
    }

    fn relay(policy: ReconnectPolicy) -> EdgeRelay {
        EdgeRelay::new(NodeId::new("SERVER_A"), policy)
    }

    #[test]
    fn test_manual_lifecycle() {
        let mut relay = relay(ReconnectPolicy::Manual);
        assert_eq!(relay.state(), RelayState::Disconnected);

        let generation = relay.begin_connect("token".to_string());
        assert_eq!(relay.state(), RelayState::Connecting);
        assert!(relay.on_accepted(generation));
        assert_eq!(relay.status(), LinkStatus::Connected);

        assert_eq!(relay.on_link_lost(generation), LinkLoss::Down);
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert_eq!(relay.begin_retry(generation), None);
    }

    #[test]
    fn test_events_from_superseded_link_are_ignored() {
        let mut relay = relay(ReconnectPolicy::Manual);
        let old = relay.begin_connect("old".to_string());
        relay.on_accepted(old);
        let new = relay.begin_connect("new".to_string());

        assert_eq!(relay.on_link_lost(old), LinkLoss::Stale);
        assert!(!relay.on_accepted(old));
        assert_eq!(relay.state(), RelayState::Connecting);
        assert!(relay.on_accepted(new));
    }

    #[test]
    fn test_rejection_is_never_retried() {
        let mut relay = relay(backoff(3));
        let generation = relay.begin_connect("bad".to_string());
        assert!(relay.on_rejected(generation));
        assert_eq!(relay.state(), RelayState::Disconnected);
        assert_eq!(relay.begin_retry(generation), None);
    }

    #[test]
    fn test_backoff_opens_circuit_after_max_attempts() {
        let mut relay = relay(backoff(2));
        let mut generation = relay.begin_connect("token".to_string());
        relay.on_accepted(generation);

        for expected in 1..=2 {
            match relay.on_link_lost(generation) {
                LinkLoss::RetryIn { attempt, delay } => {
                    assert_eq!(attempt, expected);
                    assert!(delay <= Duration::from_millis(1_000));
                }
                other => panic!("Expected retry, got {other:?}"),
            }
            assert_eq!(relay.state().label(), "retrying");
            let (next, token) = relay.begin_retry(generation).unwrap();
            assert_eq!(token, "token");
            generation = next;
        }

        assert_eq!(relay.on_link_lost(generation), LinkLoss::CircuitOpened);
        assert_eq!(relay.state(), RelayState::CircuitOpen);
        assert_eq!(relay.state().label(), "circuit_open");
    }

    #[test]
    fn test_successful_retry_resets_failures() {
        let mut relay = relay(backoff(1));
        let generation = relay.begin_connect("token".to_string());
        relay.on_link_lost(generation);
        let (generation, _) = relay.begin_retry(generation).unwrap();
        relay.on_accepted(generation);

        assert!(matches!(
            relay.on_link_lost(generation),
            LinkLoss::RetryIn { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_backoff_ceiling_grows_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
            max_attempts: 10,
        };
        assert_eq!(policy.ceiling(1), Duration::from_millis(100));
        assert_eq!(policy.ceiling(2), Duration::from_millis(200));
        assert_eq!(policy.ceiling(3), Duration::from_millis(400));
        assert_eq!(policy.ceiling(4), Duration::from_millis(500));
        assert_eq!(policy.ceiling(40), Duration::from_millis(500));
        for attempt in 1..6 {
            assert!(policy.delay(attempt) <= policy.ceiling(attempt));
        }
    }

    #[test]
    fn test_wrap_only_while_connected() {
        let mut relay = relay(ReconnectPolicy::Manual);
        assert!(relay.wrap_outbound("{}").is_none());

        let generation = relay.begin_connect("token".to_string());
        relay.on_accepted(generation);
        let envelope = relay.wrap_outbound(r#"{"t":"clear","i":0}"#).unwrap();
        assert_eq!(envelope.sender.as_str(), "SERVER_A");
        assert_eq!(envelope.content, r#"{"t":"clear","i":0}"#);
    }

    #[test]
    fn test_classify_upstream() {
        let relay = relay(ReconnectPolicy::Manual);
        let own = Envelope::new(NodeId::new("SERVER_A"), "mine", 1).to_wire().unwrap();
        let other = Envelope::new(NodeId::new("SERVER_B"), "theirs", 1).to_wire().unwrap();
        let direct = r#"{"type":"settings_update","settings":{}}"#;

        assert_eq!(relay.classify(&own), UpstreamMessage::SelfEcho("mine".to_string()));
        assert_eq!(relay.classify(&other), UpstreamMessage::Relayed("theirs".to_string()));
        assert_eq!(relay.classify(direct), UpstreamMessage::Direct(direct.to_string()));
    }
}
