//! Time-bucketed volume spike detection (SPEC_FULL.md §4.2).
//!
//! Individual tick volumes are tiny and noisy; volume is aggregated into 1-second buckets and
//! a spike is only evaluated once a bucket closes (a tick arrives in a strictly later bucket).

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeResult {
    pub symbol: String,
    pub current_volume: f64,
    pub average_volume: f64,
    pub multiplier: f64,
    pub is_spike: bool,
}

struct SymbolState {
    last_bucket: i64,
    current_bucket_volume: f64,
    history: VecDeque<f64>,
}

/// Multi-symbol time-bucketed volume spike detector.
pub struct VolumeSpikeBySecond {
    window_size: usize,
    spike_threshold: f64,
    symbols: HashMap<String, SymbolState>,
}

const MIN_COMPLETED_BUCKETS: usize = 5;

impl VolumeSpikeBySecond {
    pub fn new(window_size: usize, spike_threshold: f64) -> Self {
        Self {
            window_size,
            spike_threshold,
            symbols: HashMap::new(),
        }
    }

    pub fn update(&mut self, symbol: &str, volume: f64, event_ms: i64) -> Option<VolumeResult> {
        let bucket = event_ms.div_euclid(1000);
        let window_size = self.window_size;
        let threshold = self.spike_threshold;

        if !self.symbols.contains_key(symbol) {
            self.symbols.insert(
                symbol.to_string(),
                SymbolState {
                    last_bucket: bucket,
                    current_bucket_volume: volume,
                    history: VecDeque::with_capacity(window_size + 1),
                },
            );
            return None;
        }

        let state = self.symbols.get_mut(symbol).unwrap();

        if bucket == state.last_bucket {
            state.current_bucket_volume += volume;
            return None;
        }

        // New bucket: close out the previous one.
        let completed_volume = state.current_bucket_volume;
        state.history.push_back(completed_volume);
        while state.history.len() > window_size {
            state.history.pop_front();
        }
        state.current_bucket_volume = volume;
        state.last_bucket = bucket;

        if state.history.len() < MIN_COMPLETED_BUCKETS {
            return None;
        }

        let average_volume = if state.history.len() == 1 {
            completed_volume
        } else {
            let previous: f64 = state.history.iter().rev().skip(1).sum();
            previous / (state.history.len() - 1) as f64
        };

        let multiplier = if average_volume > 0.0 {
            completed_volume / average_volume
        } else {
            0.0
        };

        Some(VolumeResult {
            symbol: symbol.to_string(),
            current_volume: completed_volume,
            average_volume,
            multiplier,
            is_spike: multiplier > threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario C (SPEC_FULL.md §8): fifteen quiet ticks, then one ten-unit spike.
    #[test]
    fn volume_spike_detected() {
        let mut vol = VolumeSpikeBySecond::new(10, 5.0);
        let t = 1_000_000_000_i64;
        for i in 0..15 {
            vol.update("E", 1.0, t + i * 1000);
        }
        vol.update("E", 10.0, t + 15_000);
        let result = vol
            .update("E", 1.0, t + 16_000)
            .expect("spike should surface on the bucket after the spike closes");
        assert!(result.is_spike);
        assert!(result.multiplier >= 5.0);
    }

    #[test]
    fn multiplier_is_never_negative() {
        let mut vol = VolumeSpikeBySecond::new(5, 5.0);
        let t = 0_i64;
        for i in 0..20 {
            if let Some(r) = vol.update("E", (i % 3) as f64, t + i * 1000) {
                assert!(r.multiplier >= 0.0);
                if r.is_spike {
                    assert!(r.multiplier > 5.0);
                }
            }
        }
    }

    #[test]
    fn no_result_before_five_completed_buckets() {
        let mut vol = VolumeSpikeBySecond::new(10, 5.0);
        let t = 0_i64;
        for i in 0..4 {
            assert!(vol.update("E", 1.0, t + i * 1000).is_none());
        }
    }
}
