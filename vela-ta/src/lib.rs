//! # Vela-TA
//! Indicator catalog for the Vela line graph.
//!
//! Every indicator here is a [`vela_data::Indicator`] node: wire it into a
//! [`vela_data::LineGraph`] against feed or indicator lines and it computes
//! in either evaluation mode (RSI and ATR pin the engine to event mode
//! because Wilder smoothing carries state across calls).

pub mod indicators;

pub use indicators::{Atr, CrossOver, Ema, Highest, Lowest, Rsi, Sma, StdDev};
