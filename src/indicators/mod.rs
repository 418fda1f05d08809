//! Streaming, per-symbol technical indicators (SPEC_FULL.md §4.1-4.4).
//!
//! Every detector here is stateless across calls except for the state it owns internally per
//! symbol; none of them touch the network, the log, or cooldowns. The analyzer (`crate::analyzer`)
//! is the only caller and the only place trigger semantics and cooldowns live.

mod price;
mod rsi;
mod volume;

pub use price::{LevelCross, LevelDirection, LevelResult, PriceChangeWindow, WhaleResult};
pub use rsi::{RsiBySecond, RsiResult};
pub use volume::{VolumeResult, VolumeSpikeBySecond};
