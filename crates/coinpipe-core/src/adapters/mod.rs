//! Upstream price API adapters.

pub mod coingecko;

pub use coingecko::{CoinGeckoSource, FetchSettings};
