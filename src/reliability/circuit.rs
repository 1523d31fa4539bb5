use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open { until_ms: u64 },
}

/// Consecutive-loss breaker. Opening resets the counter; the circuit closes
/// again on its own once the cooldown has elapsed.
#[derive(Debug, Clone)]
pub struct LossBreaker {
    pub state: CircuitState,
    pub losses: u32,
    pub threshold: u32,
    pub cooldown_ms: u64,
    pub enabled: bool,
}

impl LossBreaker {
    pub fn new(threshold: u32, cooldown_ms: u64) -> Self {
        Self { state: CircuitState::Closed, losses: 0, threshold: threshold.max(1), cooldown_ms, enabled: true }
    }

    /// Counts losses but never opens.
    pub fn disabled(threshold: u32, cooldown_ms: u64) -> Self {
        Self { enabled: false, ..Self::new(threshold, cooldown_ms) }
    }

    pub fn record_win(&mut self) {
        self.losses = 0;
    }

    /// Returns the pause deadline when this loss opened the circuit.
    pub fn record_loss(&mut self, now_ms: u64) -> Option<u64> {
        self.losses += 1;
        if self.enabled && self.losses >= self.threshold {
            let until_ms = now_ms.saturating_add(self.cooldown_ms);
            self.state = CircuitState::Open { until_ms };
            self.losses = 0;
            return Some(until_ms);
        }
        None
    }

    pub fn allow(&self, now_ms: u64) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { until_ms } => now_ms >= until_ms,
        }
    }

    pub fn pause_until(&self) -> Option<u64> {
        match self.state {
            CircuitState::Open { until_ms } => Some(until_ms),
            CircuitState::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_opens_on_threshold() {
        let mut cb = LossBreaker::new(2, 720_000);
        assert!(cb.allow(0));
        assert_eq!(cb.record_loss(1_000), None);
        assert!(cb.allow(1_000));
        assert_eq!(cb.record_loss(2_000), Some(722_000));
        assert!(!cb.allow(2_000));
        assert_eq!(cb.losses, 0, "counter resets when the circuit opens");
    }

    #[test]
    fn test_circuit_closes_after_cooldown() {
        let mut cb = LossBreaker::new(1, 10_000);
        cb.record_loss(0);
        assert!(!cb.allow(9_999));
        assert!(cb.allow(10_000));
    }

    #[test]
    fn test_win_resets_streak() {
        let mut cb = LossBreaker::new(2, 1_000);
        cb.record_loss(0);
        cb.record_win();
        assert_eq!(cb.record_loss(0), None);
        assert!(cb.allow(0));
    }

    #[test]
    fn test_disabled_never_opens() {
        let mut cb = LossBreaker::disabled(1, 1_000);
        assert_eq!(cb.record_loss(0), None);
        assert_eq!(cb.record_loss(0), None);
        assert!(cb.allow(0));
        assert_eq!(cb.losses, 2);
    }
}
