//! HFT Processor
//! Mission: the hot path. Drains a bounded priority queue in batches, runs
//! each task through a caller-supplied handler, and trips a circuit breaker
//! when the handler fails or runs too slow - shedding load instead of
//! queueing behind a degraded downstream.

mod breaker;
mod pool;
mod queue;

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

pub use breaker::{CircuitBreaker, CircuitState};
pub use pool::ObjectPool;
pub use queue::{Priority, PriorityQueue};

use crate::config::HftConfig;
use crate::error::BrainResult;
use crate::performance::latency::LatencyHistogram;

/// One unit of hot-path work: a routed order leg, a risk re-check, a
/// cancel/replace. The processor is payload-agnostic; callers interpret
/// `payload` inside their handler closure.
#[derive(Debug, Clone)]
pub struct HftTask {
    pub id: Uuid,
    pub payload: serde_json::Value,
}

impl HftTask {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencySnapshot {
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

pub struct HftProcessor {
    config: HftConfig,
    queue: Mutex<PriorityQueue<HftTask>>,
    breaker: CircuitBreaker,
    latency: LatencyHistogram,
    scratch_pool: ObjectPool<Vec<u8>>,
}

impl HftProcessor {
    pub fn new(config: HftConfig) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, Duration::from_millis(config.recovery_time_ms));
        let scratch_pool = ObjectPool::new(config.preallocated_objects, Vec::<u8>::new);
        let queue = Mutex::new(PriorityQueue::new(config.priority_queue_size));
        Self {
            config,
            queue,
            breaker,
            latency: LatencyHistogram::new(),
            scratch_pool,
        }
    }

    pub fn submit(&self, priority: Priority, task: HftTask) -> bool {
        let accepted = self.queue.lock().push(priority, task);
        if !accepted {
            warn!("hft queue at capacity, task dropped");
        }
        accepted
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Discards every queued task without running it. Used by the operator
    /// risk-halt endpoint to cancel open order flow immediately.
    pub fn drain_all(&self) -> usize {
        let mut queue = self.queue.lock();
        let mut cancelled = 0;
        while queue.pop().is_some() {
            cancelled += 1;
        }
        cancelled
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn latency_snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            p50_us: self.latency.p50(),
            p95_us: self.latency.p95(),
            p99_us: self.latency.p99(),
            max_us: self.latency.max(),
        }
    }

    /// Drains up to `batch_size` tasks (or until `batch_timeout_micros`
    /// elapses), running `handler` on each. Does nothing and returns 0 if
    /// the circuit breaker is open. A handler error, or latency above
    /// `circuit_breaker_threshold_micros`, counts as a breaker failure;
    /// anything else counts as a success.
    pub fn process_batch<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(&HftTask) -> BrainResult<()>,
    {
        if !self.breaker.allow_request() {
            return 0;
        }

        let deadline = Instant::now() + Duration::from_micros(self.config.batch_timeout_micros);
        let mut processed = 0;

        for _ in 0..self.config.batch_size {
            if Instant::now() >= deadline {
                break;
            }
            let task = match self.queue.lock().pop() {
                Some(t) => t,
                None => break,
            };

            let _scratch = self.scratch_pool.acquire();
            let start = Instant::now();
            let result = handler(&task);
            let elapsed_us = start.elapsed().as_micros() as u64;
            self.latency.record(elapsed_us);

            if result.is_err() || elapsed_us > self.config.circuit_breaker_threshold_micros {
                self.breaker.record_failure();
            } else {
                self.breaker.record_success();
            }
            processed += 1;
        }

        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> HftConfig {
        HftConfig {
            max_latency_micros: 10_000,
            batch_size: 8,
            batch_timeout_micros: 100_000,
            priority_queue_size: 16,
            preallocated_objects: 4,
            failure_threshold: 2,
            circuit_breaker_threshold_micros: 5_000,
            recovery_time_ms: 20,
        }
    }

    #[test]
    fn processes_submitted_tasks_in_priority_order() {
        let proc = HftProcessor::new(config());
        proc.submit(Priority::Normal, HftTask::new(json!({"n": 1})));
        proc.submit(Priority::Critical, HftTask::new(json!({"n": 2})));

        let mut order = Vec::new();
        proc.process_batch(|task| {
            order.push(task.payload["n"].as_i64().unwrap());
            Ok(())
        });

        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn s6_repeated_handler_errors_trip_the_breaker() {
        let proc = HftProcessor::new(config());
        for _ in 0..5 {
            proc.submit(Priority::Normal, HftTask::new(json!({})));
        }

        proc.process_batch(|_| Err(crate::error::BrainError::TransientExchange("boom".to_string())));

        assert_eq!(proc.circuit_state(), CircuitState::Open);
        let processed = proc.process_batch(|_| Ok(()));
        assert_eq!(processed, 0, "breaker open should shed the whole batch");
    }

    #[test]
    fn breaker_recovers_after_window_elapses() {
        let proc = HftProcessor::new(config());
        proc.submit(Priority::Normal, HftTask::new(json!({})));
        proc.process_batch(|_| Err(crate::error::BrainError::TransientExchange("boom".to_string())));
        proc.submit(Priority::Normal, HftTask::new(json!({})));
        proc.process_batch(|_| Err(crate::error::BrainError::TransientExchange("boom".to_string())));
        assert_eq!(proc.circuit_state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        proc.submit(Priority::Normal, HftTask::new(json!({})));
        let processed = proc.process_batch(|_| Ok(()));
        assert_eq!(processed, 1);
        assert_eq!(proc.circuit_state(), CircuitState::Closed);
    }

    #[test]
    fn drain_all_empties_the_queue_without_processing() {
        let proc = HftProcessor::new(config());
        for _ in 0..3 {
            proc.submit(Priority::Normal, HftTask::new(json!({})));
        }
        assert_eq!(proc.drain_all(), 3);
        assert_eq!(proc.queue_depth(), 0);
    }

    #[test]
    fn latency_snapshot_reflects_recorded_samples() {
        let proc = HftProcessor::new(config());
        proc.submit(Priority::Normal, HftTask::new(json!({})));
        proc.process_batch(|_| Ok(()));
        let snap = proc.latency_snapshot();
        assert!(snap.max_us >= snap.p50_us);
    }
}
