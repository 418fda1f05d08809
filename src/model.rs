//! Canonical wire types: trades off the exchange feed and alerts produced by the analyzer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A single matched-order observation from the exchange feed.
///
/// `price` and `volume` are parsed once, losslessly, at the ingestor boundary and carried
/// as `Decimal` through the log; indicator math converts to `f64` internally (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    /// Epoch milliseconds, as reported by the exchange (`T` field on the wire).
    pub time: i64,
}

impl Trade {
    /// Parses the feed's raw `{s, p, q, T}` shape. Prices/quantities arrive as decimal strings.
    pub fn from_feed_message(raw: &RawFeedMessage) -> Result<Self, TradeParseError> {
        let price = Decimal::from_str(&raw.p)
            .map_err(|_| TradeParseError::BadDecimal("p", raw.p.clone()))?;
        let volume = Decimal::from_str(&raw.q)
            .map_err(|_| TradeParseError::BadDecimal("q", raw.q.clone()))?;
        if price <= Decimal::ZERO {
            return Err(TradeParseError::NonPositivePrice(price));
        }
        Ok(Trade {
            symbol: raw.s.clone(),
            price,
            volume,
            time: raw.t,
        })
    }

    pub fn price_f64(&self) -> f64 {
        // `Decimal -> f64` can only fail for values far outside what any real price ever is.
        self.price.try_into().unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.try_into().unwrap_or(0.0)
    }
}

/// Raw shape of a single element on the exchange feed, per SPEC_FULL.md §6: `s`, `p`, `q`, `T`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFeedMessage {
    pub s: String,
    pub p: String,
    pub q: String,
    #[serde(rename = "T")]
    pub t: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TradeParseError {
    #[error("field {0} is not a valid decimal: {1:?}")]
    BadDecimal(&'static str, String),
    #[error("price must be strictly positive, got {0}")]
    NonPositivePrice(Decimal),
}

/// The five trigger kinds the analyzer can emit (SPEC_FULL.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    RsiHigh,
    RsiLow,
    VolumeSpike,
    WhaleAlert,
    PsychLevel,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::RsiHigh => "RSI_HIGH",
            TriggerKind::RsiLow => "RSI_LOW",
            TriggerKind::VolumeSpike => "VOLUME_SPIKE",
            TriggerKind::WhaleAlert => "WHALE_ALERT",
            TriggerKind::PsychLevel => "PSYCH_LEVEL",
        }
    }
}

/// An alert produced by the analyzer once a trigger clears its cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub symbol: String,
    pub price: f64,
    pub trigger_type: TriggerKind,
    pub trigger_value: f64,
    pub message: String,
    pub time: i64,
}

/// Downstream LLM analysis for a given alert, dispatched once text generation succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub symbol: String,
    pub text: String,
    pub time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_feed_message() {
        let raw = RawFeedMessage {
            s: "BTCUSDT".into(),
            p: "67540.50".into(),
            q: "0.001".into(),
            t: 1_703_683_200_000,
        };
        let trade = Trade::from_feed_message(&raw).unwrap();
        assert_eq!(trade.symbol, "BTCUSDT");
        assert_eq!(trade.price, Decimal::from_str("67540.50").unwrap());
        assert_eq!(trade.time, 1_703_683_200_000);
    }

    #[test]
    fn rejects_non_positive_price() {
        let raw = RawFeedMessage {
            s: "BTCUSDT".into(),
            p: "0".into(),
            q: "1".into(),
            t: 0,
        };
        assert!(matches!(
            Trade::from_feed_message(&raw),
            Err(TradeParseError::NonPositivePrice(_))
        ));
    }

    #[test]
    fn rejects_unparseable_decimal() {
        let raw = RawFeedMessage {
            s: "BTCUSDT".into(),
            p: "not-a-number".into(),
            q: "1".into(),
            t: 0,
        };
        assert!(matches!(
            Trade::from_feed_message(&raw),
            Err(TradeParseError::BadDecimal("p", _))
        ));
    }
}
