//! Per-operator profiling counters.
//!
//! Active only in `report_stats` mode (the `prof_dag` preset or an
//! `enable_profiling` override). Workers record a start and end timestamp
//! around each operator launch; the accumulated timings aggregate into
//! per-type statistics and per-operator costs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Aggregated timing for one operator type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpTypeStat {
    /// Operator type name.
    pub op_type: String,
    /// Number of recorded executions.
    pub runs: usize,
    /// Mean execution time in milliseconds.
    pub mean_ms: f64,
    /// Standard deviation in milliseconds.
    pub stddev_ms: f64,
}

/// Aggregated timings grouped by operator type, sorted by type name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorStats {
    /// One entry per operator type.
    pub per_type: Vec<OpTypeStat>,
}

/// Mean cost of one operator position in the net.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpCost {
    /// Operator index in the net definition.
    pub op_id: usize,
    /// Operator type name.
    pub op_type: String,
    /// Mean execution time in milliseconds.
    pub mean_ms: f64,
}

#[derive(Debug, Default, Clone)]
struct OpTiming {
    total_ms: f64,
    total_sq_ms: f64,
    runs: usize,
    started: Option<Instant>,
}

/// Timing collector, one slot per operator.
#[derive(Debug)]
pub struct ProfilingCounters {
    enabled: bool,
    op_types: Vec<String>,
    timings: Mutex<Vec<OpTiming>>,
    iterations: AtomicUsize,
}

impl ProfilingCounters {
    /// Create a collector for the given operators. A disabled collector
    /// ignores every recording call.
    pub fn new(enabled: bool, op_types: Vec<String>) -> Self {
        let slots = vec![OpTiming::default(); op_types.len()];
        Self {
            enabled,
            op_types,
            timings: Mutex::new(slots),
            iterations: AtomicUsize::new(0),
        }
    }

    /// Whether recording is active.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of iterations observed.
    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::Relaxed)
    }

    pub(crate) fn begin_iteration(&self) {
        if self.enabled {
            self.iterations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_op_start(&self, op_id: usize) {
        if !self.enabled {
            return;
        }
        self.timings.lock()[op_id].started = Some(Instant::now());
    }

    pub(crate) fn add_op_end(&self, op_id: usize) {
        if !self.enabled {
            return;
        }
        let mut timings = self.timings.lock();
        let slot = &mut timings[op_id];
        if let Some(started) = slot.started.take() {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
            slot.total_ms += elapsed_ms;
            slot.total_sq_ms += elapsed_ms * elapsed_ms;
            slot.runs += 1;
        }
    }

    /// Aggregate recorded timings by operator type.
    pub fn operator_stats(&self) -> OperatorStats {
        let timings = self.timings.lock();
        let mut per_type: Vec<OpTypeStat> = Vec::new();
        for (op_id, slot) in timings.iter().enumerate() {
            if slot.runs == 0 {
                continue;
            }
            let op_type = &self.op_types[op_id];
            match per_type.iter_mut().find(|stat| &stat.op_type == op_type) {
                Some(stat) => {
                    // Fold raw sums into the existing entry; stddev is
                    // recomputed from the merged moments below.
                    stat.runs += slot.runs;
                    stat.mean_ms += slot.total_ms;
                    stat.stddev_ms += slot.total_sq_ms;
                }
                None => per_type.push(OpTypeStat {
                    op_type: op_type.clone(),
                    runs: slot.runs,
                    mean_ms: slot.total_ms,
                    stddev_ms: slot.total_sq_ms,
                }),
            }
        }
        for stat in &mut per_type {
            let runs = stat.runs as f64;
            let mean = stat.mean_ms / runs;
            let variance = (stat.stddev_ms / runs - mean * mean).max(0.0);
            stat.mean_ms = mean;
            stat.stddev_ms = variance.sqrt();
        }
        per_type.sort_by(|a, b| a.op_type.cmp(&b.op_type));
        OperatorStats { per_type }
    }

    /// Mean cost per operator position.
    pub fn per_operator_cost(&self) -> Vec<OpCost> {
        let timings = self.timings.lock();
        timings
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.runs > 0)
            .map(|(op_id, slot)| OpCost {
                op_id,
                op_type: self.op_types[op_id].clone(),
                mean_ms: slot.total_ms / slot.runs as f64,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(counters: &ProfilingCounters, op_id: usize) {
        counters.add_op_start(op_id);
        counters.add_op_end(op_id);
    }

    #[test]
    fn test_disabled_collector_records_nothing() {
        let counters = ProfilingCounters::new(false, vec!["A".to_string()]);
        counters.begin_iteration();
        record(&counters, 0);
        assert_eq!(counters.iterations(), 0);
        assert!(counters.operator_stats().per_type.is_empty());
        assert!(counters.per_operator_cost().is_empty());
    }

    #[test]
    fn test_stats_grouped_by_type() {
        let counters = ProfilingCounters::new(
            true,
            vec!["Add".to_string(), "Add".to_string(), "Mul".to_string()],
        );
        counters.begin_iteration();
        for op_id in 0..3 {
            record(&counters, op_id);
        }

        let stats = counters.operator_stats();
        assert_eq!(stats.per_type.len(), 2);
        assert_eq!(stats.per_type[0].op_type, "Add");
        assert_eq!(stats.per_type[0].runs, 2);
        assert_eq!(stats.per_type[1].op_type, "Mul");
        assert_eq!(stats.per_type[1].runs, 1);
        for stat in &stats.per_type {
            assert!(stat.mean_ms >= 0.0);
            assert!(stat.stddev_ms >= 0.0);
        }
    }

    #[test]
    fn test_per_operator_cost_skips_unrun_ops() {
        let counters =
            ProfilingCounters::new(true, vec!["A".to_string(), "B".to_string()]);
        record(&counters, 1);

        let costs = counters.per_operator_cost();
        assert_eq!(costs.len(), 1);
        assert_eq!(costs[0].op_id, 1);
        assert_eq!(costs[0].op_type, "B");
    }

    #[test]
    fn test_end_without_start_ignored() {
        let counters = ProfilingCounters::new(true, vec!["A".to_string()]);
        counters.add_op_end(0);
        assert!(counters.per_operator_cost().is_empty());
    }

    #[test]
    fn test_iterations_counted() {
        let counters = ProfilingCounters::new(true, vec![]);
        counters.begin_iteration();
        counters.begin_iteration();
        assert_eq!(counters.iterations(), 2);
    }
}
