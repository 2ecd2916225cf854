/// cooldown.rs — Post-fill cooldown tracking
///
/// Keyed by (wallet, symbol); advisory only.  The map lives in-process and is
/// injected into the executor, so tests control it and a restart resets it.
use ahash::AHashMap;

pub const DEFAULT_COOLDOWN_MS: i64 = 60_000;

#[derive(Debug)]
pub struct CooldownMap {
    window_ms: i64,
    last_fill: AHashMap<(String, String), i64>,
}

impl CooldownMap {
    pub fn new(window_ms: i64) -> Self {
        Self { window_ms, last_fill: AHashMap::new() }
    }

    /// Start the cooldown clock for (wallet, symbol).
    pub fn record_fill(&mut self, wallet_id: &str, symbol: &str, now_ms: i64) {
        self.last_fill
            .insert((wallet_id.to_string(), symbol.to_string()), now_ms);
    }

    /// Milliseconds of cooldown still in effect, or None when clear.
    pub fn remaining(&self, wallet_id: &str, symbol: &str, now_ms: i64) -> Option<i64> {
        let last = *self
            .last_fill
            .get(&(wallet_id.to_string(), symbol.to_string()))?;
        let elapsed = now_ms - last;
        if elapsed < self.window_ms {
            Some(self.window_ms - elapsed)
        } else {
            None
        }
    }
}

impl Default for CooldownMap {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_inside_window_and_clears_after() {
        let mut map = CooldownMap::default();
        map.record_fill("w1", "MARA", 1_000_000);

        assert_eq!(map.remaining("w1", "MARA", 1_000_000), Some(60_000));
        assert_eq!(map.remaining("w1", "MARA", 1_059_999), Some(1));
        assert_eq!(map.remaining("w1", "MARA", 1_060_000), None);
        assert_eq!(map.remaining("w1", "MARA", 1_060_001), None);
    }

    #[test]
    fn keys_are_scoped_per_wallet_and_symbol() {
        let mut map = CooldownMap::default();
        map.record_fill("w1", "MARA", 1_000_000);

        assert!(map.remaining("w1", "RIOT", 1_000_001).is_none());
        assert!(map.remaining("w2", "MARA", 1_000_001).is_none());
    }

    #[test]
    fn refill_restarts_the_clock() {
        let mut map = CooldownMap::default();
        map.record_fill("w1", "MARA", 1_000_000);
        map.record_fill("w1", "MARA", 1_030_000);
        assert_eq!(map.remaining("w1", "MARA", 1_060_000), Some(30_000));
    }
}
