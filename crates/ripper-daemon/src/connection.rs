//! Connection bookkeeping for the reconnect policy.

/// Outcome of a failed connection, as decided by `ConnectionState::record_attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry,
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    connected: bool,
    /// Set once the stream has delivered metadata; only then are failures
    /// considered transient.
    ever_succeeded: bool,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
}

impl ConnectionState {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            connected: false,
            ever_succeeded: false,
            reconnect_attempts: 0,
            max_reconnect_attempts,
        }
    }

    pub fn on_connected(&mut self) {
        self.connected = true;
        self.ever_succeeded = true;
        self.reconnect_attempts = 0;
    }

    /// Mark the link as up without vouching for the stream.  Returns true if
    /// it was down before.
    pub fn on_link_up(&mut self) -> bool {
        let was_down = !self.connected;
        self.connected = true;
        was_down
    }

    pub fn on_disconnected(&mut self) {
        self.connected = false;
    }

    /// Count a reconnect attempt.  With a ceiling of N, the first N failures
    /// after a success are retried and the next one gives up.  A failure
    /// before the first success is never retried.
    pub fn record_attempt(&mut self) -> ReconnectDecision {
        if !self.ever_succeeded {
            return ReconnectDecision::GiveUp;
        }
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            return ReconnectDecision::GiveUp;
        }
        self.reconnect_attempts += 1;
        ReconnectDecision::Retry
    }

    /// Back to the state of a fresh session, keeping the ceiling.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_reconnect_attempts);
    }

    pub fn ever_succeeded(&self) -> bool {
        self.ever_succeeded
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn set_max_reconnect_attempts(&mut self, max: u32) {
        self.max_reconnect_attempts = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let mut state = ConnectionState::new(3);
        assert!(!state.ever_succeeded());
        assert!(state.on_link_up());
        assert_eq!(state.reconnect_attempts(), 0);
    }

    #[test]
    fn test_failure_before_success_gives_up() {
        for max in [0, 1, 10, u32::MAX] {
            let mut state = ConnectionState::new(max);
            assert_eq!(state.record_attempt(), ReconnectDecision::GiveUp);
            assert_eq!(state.reconnect_attempts(), 0);
        }
    }

    #[test]
    fn test_ceiling() {
        let mut state = ConnectionState::new(2);
        state.on_connected();
        state.on_disconnected();
        assert_eq!(state.record_attempt(), ReconnectDecision::Retry);
        assert_eq!(state.reconnect_attempts(), 1);
        assert_eq!(state.record_attempt(), ReconnectDecision::Retry);
        assert_eq!(state.reconnect_attempts(), 2);
        assert_eq!(state.record_attempt(), ReconnectDecision::GiveUp);
        assert_eq!(state.reconnect_attempts(), 2);
    }

    #[test]
    fn test_zero_ceiling_never_retries() {
        let mut state = ConnectionState::new(0);
        state.on_connected();
        assert_eq!(state.record_attempt(), ReconnectDecision::GiveUp);
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut state = ConnectionState::new(2);
        state.on_connected();
        state.record_attempt();
        state.record_attempt();
        state.on_connected();
        assert_eq!(state.reconnect_attempts(), 0);
        assert_eq!(state.record_attempt(), ReconnectDecision::Retry);
    }

    #[test]
    fn test_link_up_does_not_count_as_success() {
        let mut state = ConnectionState::new(2);
        assert!(state.on_link_up());
        assert!(!state.on_link_up());
        assert!(!state.ever_succeeded());
        state.on_disconnected();
        assert!(state.on_link_up());
    }

    #[test]
    fn test_reset_keeps_ceiling() {
        let mut state = ConnectionState::new(4);
        state.on_connected();
        state.record_attempt();
        state.reset();
        assert_eq!(state, ConnectionState::new(4));
    }
}
