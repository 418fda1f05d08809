//! Time-bucketed Relative Strength Index (SPEC_FULL.md §4.1).
//!
//! Per-tick RSI on a high-frequency feed is noise; ticks are aggregated into 1-second buckets
//! keyed by `floor(event_ms / 1000)`, and RSI is computed over the closes of the last `period`
//! completed buckets.

use std::collections::{HashMap, VecDeque};

/// Result of an RSI update, emitted once a symbol has accumulated more than `period` closes.
#[derive(Debug, Clone, PartialEq)]
pub struct RsiResult {
    pub symbol: String,
    pub rsi: f64,
    pub overbought: bool,
    pub oversold: bool,
}

struct SymbolState {
    last_bucket: i64,
    closes: VecDeque<f64>,
}

/// Multi-symbol time-bucketed RSI calculator.
///
/// `overbought_threshold`/`oversold_threshold` default to 70/30, paired with the 60-candle
/// period this engine standardizes on (SPEC_FULL.md §9 resolves the 70/30-vs-80/20 question).
pub struct RsiBySecond {
    period: usize,
    overbought_threshold: f64,
    oversold_threshold: f64,
    symbols: HashMap<String, SymbolState>,
}

impl RsiBySecond {
    pub fn new(period: usize) -> Self {
        Self::with_thresholds(period, 70.0, 30.0)
    }

    pub fn with_thresholds(period: usize, overbought_threshold: f64, oversold_threshold: f64) -> Self {
        Self {
            period,
            overbought_threshold,
            oversold_threshold,
            symbols: HashMap::new(),
        }
    }

    pub fn update(&mut self, symbol: &str, price: f64, event_ms: i64) -> Option<RsiResult> {
        let bucket = event_ms.div_euclid(1000);
        let period = self.period;
        let state = self.symbols.entry(symbol.to_string()).or_insert_with(|| {
            let mut closes = VecDeque::with_capacity(period + 2);
            closes.push_back(price);
            SymbolState {
                last_bucket: bucket,
                closes,
            }
        });

        if bucket == state.last_bucket {
            if let Some(last) = state.closes.back_mut() {
                *last = price;
            }
        } else if bucket > state.last_bucket {
            state.closes.push_back(price);
            state.last_bucket = bucket;
            while state.closes.len() > period + 1 {
                state.closes.pop_front();
            }
        }
        // bucket < last_bucket (out-of-order/backfill tick): ignored, matches "no synthetic fill".

        if state.closes.len() > period {
            Some(Self::compute(
                symbol,
                &state.closes,
                period,
                self.overbought_threshold,
                self.oversold_threshold,
            ))
        } else {
            None
        }
    }

    fn compute(
        symbol: &str,
        closes: &VecDeque<f64>,
        period: usize,
        overbought_threshold: f64,
        oversold_threshold: f64,
    ) -> RsiResult {
        let n = closes.len();
        let window: Vec<f64> = closes.iter().skip(n - period - 1).copied().collect();

        let mut gain_sum = 0.0;
        let mut loss_sum = 0.0;
        for pair in window.windows(2) {
            let delta = pair[1] - pair[0];
            if delta > 0.0 {
                gain_sum += delta;
            } else {
                loss_sum += -delta;
            }
        }
        let avg_gain = gain_sum / period as f64;
        let avg_loss = loss_sum / period as f64;

        let rsi = if avg_loss == 0.0 {
            if avg_gain > 0.0 {
                100.0
            } else {
                50.0
            }
        } else if avg_gain == 0.0 {
            0.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
        let rsi = (rsi * 100.0).round() / 100.0;

        RsiResult {
            symbol: symbol.to_string(),
            rsi,
            overbought: rsi > overbought_threshold,
            oversold: rsi < oversold_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario A (SPEC_FULL.md §8): RSI uptrend -> overbought, period = 2.
    #[test]
    fn uptrend_reaches_overbought() {
        let mut rsi = RsiBySecond::new(2);
        let base = 1_000_000_000_000_i64;
        let prices = [100.0, 110.0, 120.0, 130.0, 140.0];
        let mut last = None;
        for (i, price) in prices.iter().enumerate() {
            let event_ms = base + i as i64 * 1100;
            last = rsi.update("E", *price, event_ms);
        }
        let result = last.expect("rsi should have fired by the last tick");
        assert_eq!(result.rsi, 100.0);
        assert!(result.overbought);
    }

    /// Scenario B (SPEC_FULL.md §8): RSI downtrend -> oversold.
    #[test]
    fn downtrend_reaches_oversold() {
        let mut rsi = RsiBySecond::new(2);
        let base = 1_000_000_000_000_i64;
        let prices = [100.0, 90.0, 80.0, 70.0, 60.0];
        let mut last = None;
        for (i, price) in prices.iter().enumerate() {
            let event_ms = base + i as i64 * 1100;
            last = rsi.update("E", *price, event_ms);
        }
        let result = last.expect("rsi should have fired by the last tick");
        assert!(result.rsi < 10.0);
        assert!(result.oversold);
    }

    #[test]
    fn deque_never_exceeds_period_plus_one() {
        let mut rsi = RsiBySecond::new(5);
        let base = 1_000_000_000_000_i64;
        for i in 0..1000 {
            rsi.update("E", 100.0 + (i % 7) as f64, base + i * 1000);
            let state = rsi.symbols.get("E").unwrap();
            assert!(state.closes.len() <= 6);
        }
    }

    #[test]
    fn same_bucket_overwrites_provisional_close() {
        let mut rsi = RsiBySecond::new(2);
        let result_same_bucket = rsi.update("E", 100.0, 1_000);
        assert!(result_same_bucket.is_none());
        // Still within the same 1-second bucket: overwrites, does not append.
        let result = rsi.update("E", 105.0, 1_500);
        assert!(result.is_none());
        let state = rsi.symbols.get("E").unwrap();
        assert_eq!(state.closes.len(), 1);
        assert_eq!(*state.closes.back().unwrap(), 105.0);
    }

    #[test]
    fn skipped_buckets_collapse_without_synthetic_fill() {
        let mut rsi = RsiBySecond::new(2);
        rsi.update("E", 100.0, 0);
        // Ten seconds later: one new bucket entry, not ten.
        rsi.update("E", 110.0, 10_000);
        let state = rsi.symbols.get("E").unwrap();
        assert_eq!(state.closes.len(), 2);
    }

    #[test]
    fn custom_thresholds_are_honored() {
        let mut rsi = RsiBySecond::with_thresholds(2, 80.0, 20.0);
        let base = 1_000_000_000_000_i64;
        let prices = [100.0, 110.0, 120.0];
        let mut last = None;
        for (i, price) in prices.iter().enumerate() {
            last = rsi.update("E", *price, base + i as i64 * 1100);
        }
        let result = last.unwrap();
        assert!(result.overbought);
    }
}
