//! Performance measurement
//! Mission: the latency histogram used by the HFT processor. The broader
//! memory/CPU/IO/throughput profiler this module once hosted tracked a
//! different pipeline's components and has no counterpart here.

pub mod latency;
