use std::time::Duration;
use tracing::debug;

/// One-at-a-time executor with a cooldown between turns.
///
/// Callers loop over their items, calling [`wait_turn`](Self::wait_turn)
/// before each one and [`cool_down`](Self::cool_down) after it. A cooldown
/// scheduled after the last item is simply never awaited.
#[derive(Debug, Default)]
pub struct SequentialPacer {
    pending: Option<Duration>,
    turns: usize,
}

impl SequentialPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn wait_turn(&mut self) {
        if let Some(delay) = self.pending.take() {
            if !delay.is_zero() {
                debug!(turn = self.turns + 1, delay_ms = delay.as_millis() as u64, "cooling down");
                tokio::time::sleep(delay).await;
            }
        }
        self.turns += 1;
    }

    /// Replaces any cooldown already scheduled.
    pub fn cool_down(&mut self, delay: Duration) {
        self.pending = Some(delay);
    }

    pub fn turns(&self) -> usize {
        self.turns
    }
}
