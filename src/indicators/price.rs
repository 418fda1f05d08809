//! Rolling-window price-change ("whale") detection and psychological level crossings
//! (SPEC_FULL.md §4.3, §4.4).

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq)]
pub struct WhaleResult {
    pub symbol: String,
    pub change_percent: f64,
    pub window_seconds: u64,
    pub is_whale: bool,
}

struct PriceWindowState {
    points: VecDeque<(i64, f64)>,
}

/// Detects moves of at least `threshold_percent` within a rolling `window_seconds` window.
pub struct PriceChangeWindow {
    window_ms: i64,
    window_seconds: u64,
    threshold_percent: f64,
    symbols: HashMap<String, PriceWindowState>,
}

impl PriceChangeWindow {
    pub fn new(window_seconds: u64, threshold_percent: f64) -> Self {
        Self {
            window_ms: window_seconds as i64 * 1000,
            window_seconds,
            threshold_percent,
            symbols: HashMap::new(),
        }
    }

    pub fn update(&mut self, symbol: &str, price: f64, event_ms: i64) -> Option<WhaleResult> {
        let state = self
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| PriceWindowState {
                points: VecDeque::new(),
            });

        state.points.push_back((event_ms, price));

        let cutoff = event_ms - self.window_ms;
        while state
            .points
            .front()
            .map(|(ts, _)| *ts < cutoff)
            .unwrap_or(false)
        {
            state.points.pop_front();
        }

        // Post-append, the deque can never be empty: we just pushed (event_ms, price), and
        // event_ms can't be older than its own cutoff.
        let (_, oldest_price) = *state.points.front().expect("non-empty after push");

        let change_pct = 100.0 * (price - oldest_price) / oldest_price;

        if change_pct.abs() >= self.threshold_percent {
            Some(WhaleResult {
                symbol: symbol.to_string(),
                change_percent: (change_pct * 100.0).round() / 100.0,
                window_seconds: self.window_seconds,
                is_whale: true,
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelResult {
    pub symbol: String,
    pub level: i64,
    pub direction: LevelDirection,
    pub price: f64,
}

/// Detects crossings of a fixed, shared set of integer price levels.
pub struct LevelCross {
    levels: Vec<i64>,
    last_price: HashMap<String, f64>,
}

impl LevelCross {
    pub fn new(mut levels: Vec<i64>) -> Self {
        levels.sort_unstable();
        Self {
            levels,
            last_price: HashMap::new(),
        }
    }

    pub fn update(&mut self, symbol: &str, price: f64) -> Option<LevelResult> {
        let last_price = match self.last_price.insert(symbol.to_string(), price) {
            None => return None,
            Some(previous) => previous,
        };

        for &level in &self.levels {
            let level_f = level as f64;
            if last_price < level_f && level_f <= price {
                return Some(LevelResult {
                    symbol: symbol.to_string(),
                    level,
                    direction: LevelDirection::Up,
                    price,
                });
            }
            if last_price > level_f && level_f >= price {
                return Some(LevelResult {
                    symbol: symbol.to_string(),
                    level,
                    direction: LevelDirection::Down,
                    price,
                });
            }
        }
        None
    }
}
