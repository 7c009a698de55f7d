//! Per-run performance counters.
//!
//! A [`RunMetrics`] lives inside one run's global context and dies with it, so
//! counters never leak between runs. [`RunMetrics::snapshot`] produces the
//! serializable [`MetricsSnapshot`] attached to the run result.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::model::NodeKind;

/// Execution statistics of one node across all index values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: String,
    pub node_kind: NodeKind,
    pub execution_count: u64,
    pub error_count: u64,
    pub total_time_ms: f64,
    pub min_time_ms: f64,
    pub max_time_ms: f64,
}

impl NodeStats {
    fn new(node_id: &str, node_kind: NodeKind) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_kind,
            execution_count: 0,
            error_count: 0,
            total_time_ms: 0.0,
            min_time_ms: f64::INFINITY,
            max_time_ms: 0.0,
        }
    }

    pub fn avg_time_ms(&self) -> f64 {
        self.total_time_ms / self.execution_count.max(1) as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableReadStats {
    pub read_count: u64,
    pub total_rows: u64,
    pub total_time_ms: f64,
}

impl TableReadStats {
    pub fn avg_time_ms(&self) -> f64 {
        self.total_time_ms / self.read_count.max(1) as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        self.hits as f64 / self.total_requests().max(1) as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreloadStats {
    pub sessions: u64,
    pub total_files: u64,
    pub total_sheets: u64,
    pub successful_sheets: u64,
    pub failed_sheets: u64,
    pub total_rows: u64,
    pub total_time_ms: f64,
    pub io_reduction: u64,
}

impl PreloadStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_sheets == 0 {
            return 0.0;
        }
        self.successful_sheets as f64 / self.total_sheets as f64
    }
}

/// Serializable view of one run's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_node_executions: u64,
    pub total_node_errors: u64,
    pub total_node_time_ms: f64,
    /// Sorted by node id.
    pub nodes: Vec<NodeStats>,
    pub table_reads: TableReadStats,
    pub cache: CacheStats,
    pub cache_hit_rate: f64,
    pub preload: PreloadStats,
}

impl MetricsSnapshot {
    pub fn node(&self, node_id: &str) -> Option<&NodeStats> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

#[derive(Default)]
struct MetricsState {
    nodes: FxHashMap<String, NodeStats>,
    table_reads: TableReadStats,
    cache: CacheStats,
    preload: PreloadStats,
}

/// Counters for one pipeline run. Shared by reference across branch workers.
#[derive(Default)]
pub struct RunMetrics {
    state: Mutex<MetricsState>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Counters stay usable after a worker panic.
    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one execution of a node.
    pub fn record_node(
        &self,
        node_id: &str,
        node_kind: NodeKind,
        elapsed_ms: f64,
        success: bool,
    ) {
        let mut state = self.state();
        let stats = state
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeStats::new(node_id, node_kind));
        stats.execution_count += 1;
        stats.total_time_ms += elapsed_ms;
        stats.min_time_ms = stats.min_time_ms.min(elapsed_ms);
        stats.max_time_ms = stats.max_time_ms.max(elapsed_ms);
        if !success {
            stats.error_count += 1;
        }
    }

    pub fn record_table_read(&self, rows: usize, elapsed_ms: f64) {
        let mut state = self.state();
        state.table_reads.read_count += 1;
        state.table_reads.total_rows += rows as u64;
        state.table_reads.total_time_ms += elapsed_ms;
    }

    pub fn record_cache_hit(&self) {
        self.state().cache.hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.state().cache.misses += 1;
    }

    /// Fold one preload session into the totals.
    pub fn record_preload(&self, session: &PreloadStats) {
        let mut state = self.state();
        let preload = &mut state.preload;
        preload.sessions += 1;
        preload.total_files += session.total_files;
        preload.total_sheets += session.total_sheets;
        preload.successful_sheets += session.successful_sheets;
        preload.failed_sheets += session.failed_sheets;
        preload.total_rows += session.total_rows;
        preload.total_time_ms += session.total_time_ms;
        preload.io_reduction += session.io_reduction;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state();
        let mut nodes: Vec<NodeStats> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        MetricsSnapshot {
            total_node_executions: nodes.iter().map(|n| n.execution_count).sum(),
            total_node_errors: nodes.iter().map(|n| n.error_count).sum(),
            total_node_time_ms: nodes.iter().map(|n| n.total_time_ms).sum(),
            nodes,
            table_reads: state.table_reads.clone(),
            cache: state.cache.clone(),
            cache_hit_rate: state.cache.hit_rate(),
            preload: state.preload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_stats() {
        let metrics = RunMetrics::new();
        metrics.record_node("agg", NodeKind::Aggregator, 2.0, true);
        metrics.record_node("agg", NodeKind::Aggregator, 4.0, false);
        metrics.record_node("filter", NodeKind::RowFilter, 1.0, true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_node_executions, 3);
        assert_eq!(snapshot.total_node_errors, 1);
        let agg = snapshot.node("agg").unwrap();
        assert_eq!(agg.min_time_ms, 2.0);
        assert_eq!(agg.max_time_ms, 4.0);
        assert_eq!(agg.avg_time_ms(), 3.0);
        assert_eq!(snapshot.nodes[0].node_id, "agg");
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = RunMetrics::new();
        assert_eq!(metrics.snapshot().cache_hit_rate, 0.0);
        metrics.record_cache_miss();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache.total_requests(), 4);
        assert_eq!(snapshot.cache_hit_rate, 0.75);
    }

    #[test]
    fn test_preload_accumulates() {
        let metrics = RunMetrics::new();
        let session = PreloadStats {
            total_files: 1,
            total_sheets: 4,
            successful_sheets: 3,
            failed_sheets: 1,
            ..Default::default()
        };
        metrics.record_preload(&session);
        metrics.record_preload(&session);
        let preload = metrics.snapshot().preload;
        assert_eq!(preload.sessions, 2);
        assert_eq!(preload.total_sheets, 8);
        assert_eq!(preload.success_rate(), 0.75);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = RunMetrics::new();
        metrics.record_table_read(10, 1.5);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["table_reads"]["total_rows"], 10);
    }
}
