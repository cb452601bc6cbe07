//! Latency measurement
//! Mission: the running-percentile histogram backing the HFT processor's
//! `LatencySnapshot`. The wider market-data/signal/API span-tracking
//! infrastructure this module once carried belonged to a different
//! pipeline and has no counterpart here.

pub mod histogram;

pub use histogram::*;
