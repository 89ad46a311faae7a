use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Lightweight in-memory metrics using atomic counters.
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,
    /// Per-operation request counts (e.g. `kv.set`, `blob.get`).
    op_counts: RwLock<HashMap<String, AtomicU64>>,
    /// Latency histogram buckets (ms): <10, <50, <100, <500, <5000, >=5000.
    pub latency_buckets: [AtomicU64; 6],
    /// Total latency sum in ms (for computing average).
    total_latency_ms: AtomicU64,
    /// When the metrics instance was created (for uptime).
    created_at: Instant,
}

const BUCKET_BOUNDS_MS: [u64; 5] = [10, 50, 100, 500, 5000];

impl Metrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            op_counts: RwLock::new(HashMap::new()),
            latency_buckets: Default::default(),
            total_latency_ms: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub fn record_request(&self, op: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        increment_map(&self.op_counts, op);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, ms: u64) {
        self.total_latency_ms.fetch_add(ms, Ordering::Relaxed);
        let bucket = BUCKET_BOUNDS_MS
            .iter()
            .position(|&bound| ms < bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let total = self.total_requests.load(Ordering::Relaxed);
        let errors = self.total_errors.load(Ordering::Relaxed);
        let latency_sum = self.total_latency_ms.load(Ordering::Relaxed);
        let avg_latency = if total > 0 {
            latency_sum as f64 / total as f64
        } else {
            0.0
        };

        let ops: HashMap<String, u64> = self
            .op_counts
            .read()
            .expect("op_counts lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let buckets: Vec<u64> = self
            .latency_buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect();

        serde_json::json!({
            "uptime_secs": self.created_at.elapsed().as_secs(),
            "total_requests": total,
            "total_errors": errors,
            "avg_latency_ms": avg_latency,
            "latency_buckets": buckets,
            "operations": ops,
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn increment_map(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) {
    {
        let read = map.read().expect("metrics lock poisoned");
        if let Some(counter) = read.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    let mut write = map.write().expect("metrics lock poisoned");
    write
        .entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = Metrics::new();
        metrics.record_request("kv.set");
        metrics.record_request("kv.set");
        metrics.record_request("blob.get");
        metrics.record_error();
        metrics.record_latency(5);
        metrics.record_latency(700);

        let snap = metrics.snapshot();
        assert_eq!(snap["total_requests"], 3);
        assert_eq!(snap["total_errors"], 1);
        assert_eq!(snap["operations"]["kv.set"], 2);
        assert_eq!(snap["operations"]["blob.get"], 1);
        assert_eq!(snap["latency_buckets"][0], 1);
        assert_eq!(snap["latency_buckets"][4], 1);
    }

    #[test]
    fn test_latency_bucket_edges() {
        let metrics = Metrics::new();
        metrics.record_latency(10); // first bound is exclusive
        metrics.record_latency(9999);
        let snap = metrics.snapshot();
        assert_eq!(snap["latency_buckets"][1], 1);
        assert_eq!(snap["latency_buckets"][5], 1);
    }
}
