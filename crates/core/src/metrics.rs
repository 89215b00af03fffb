//! Latency metrics (§4.7, §3 "Turn Timing Record")
//!
//! Each named component (stt, llm_first_token, tts_first_chunk, ...) keeps a
//! capped ring buffer of recent sample durations and exposes mean/median/p90/
//! p99 off of it. Mirrored into the process-wide `metrics` crate recorder so
//! the same numbers show up on the Prometheus exporter.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept per component before the oldest is evicted (§4.7).
const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Default)]
struct Samples(VecDeque<f64>);

impl Samples {
    fn push(&mut self, value_ms: f64) {
        if self.0.len() >= MAX_SAMPLES {
            self.0.pop_front();
        }
        self.0.push_back(value_ms);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.0.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn mean(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().sum::<f64>() / self.0.len() as f64
    }

    fn min(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().copied().fold(f64::INFINITY, f64::min)
    }

    fn max(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    fn stddev(&self) -> f64 {
        if self.0.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.0.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.0.len() as f64;
        variance.sqrt()
    }
}

/// Snapshot of a single component's recorded timings, for reporting
/// (§4.7: "mean, median, p90, p99, min, max, stddev, and count").
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComponentSnapshot {
    pub name: String,
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub stddev_ms: f64,
    pub last_ms: Option<f64>,
}

impl ComponentSnapshot {
    /// One fixed-width row of a [`LatencyMetrics::render_text`] table.
    fn render_row(&self) -> String {
        format!(
            "{:<20}{:>8}{:>10.1}{:>10.1}{:>10.1}{:>10.1}{:>10.1}{:>10.1}{:>10.1}",
            self.name,
            self.count,
            self.mean_ms,
            self.median_ms,
            self.p90_ms,
            self.p99_ms,
            self.min_ms,
            self.max_ms,
            self.stddev_ms,
        )
    }
}

struct Component {
    name: String,
    samples: RwLock<Samples>,
    total_calls: std::sync::atomic::AtomicU64,
}

impl Component {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            samples: RwLock::new(Samples::default()),
            total_calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn record(&self, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        self.samples.write().push(ms);
        self.total_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        metrics::histogram!("phone_agent_component_latency_ms", "component" => self.name.clone())
            .record(ms);
    }

    fn snapshot(&self) -> ComponentSnapshot {
        let s = self.samples.read();
        ComponentSnapshot {
            name: self.name.clone(),
            count: s.0.len(),
            mean_ms: s.mean(),
            median_ms: s.percentile(0.5),
            p90_ms: s.percentile(0.9),
            p99_ms: s.percentile(0.99),
            min_ms: s.min(),
            max_ms: s.max(),
            stddev_ms: s.stddev(),
            last_ms: s.0.back().copied(),
        }
    }
}

/// Registry of named latency components, one per process (§4.7). Typical
/// component names: `stt`, `llm_first_token`, `llm_full`, `tts_first_chunk`,
/// `turn_total` (§3 "Turn Timing Record").
pub struct LatencyMetrics {
    components: dashmap::DashMap<String, std::sync::Arc<Component>>,
}

impl LatencyMetrics {
    pub fn new() -> Self {
        Self {
            components: dashmap::DashMap::new(),
        }
    }

    fn component(&self, name: &str) -> std::sync::Arc<Component> {
        self.components
            .entry(name.to_string())
            .or_insert_with(|| std::sync::Arc::new(Component::new(name)))
            .clone()
    }

    pub fn record(&self, component: &str, duration: Duration) {
        self.component(component).record(duration);
    }

    /// Convenience timer: `let _t = metrics.start("stt");` records on drop.
    pub fn start(&self, component: &str) -> Timer<'_> {
        Timer {
            registry: self,
            component: component.to_string(),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn snapshot(&self, component: &str) -> Option<ComponentSnapshot> {
        self.components.get(component).map(|c| c.snapshot())
    }

    pub fn all_snapshots(&self) -> Vec<ComponentSnapshot> {
        let mut out: Vec<_> = self.components.iter().map(|e| e.snapshot()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// True if `component`'s p90 exceeds `budget` — used to decide whether a
    /// slow-path fallback should trip before the circuit breaker would
    /// (§4.7 "latency budget alarms", §8 "first-byte latency" property).
    pub fn exceeds_budget(&self, component: &str, budget: Duration) -> bool {
        self.snapshot(component)
            .map(|s| s.p90_ms > budget.as_secs_f64() * 1000.0)
            .unwrap_or(false)
    }

    /// Renders every component's snapshot as a fixed-width text table (§4.7:
    /// "as text (fixed-width table) or a structured value with the same
    /// fields"). `all_snapshots` is the structured equivalent.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "{:<20}{:>8}{:>10}{:>10}{:>10}{:>10}{:>10}{:>10}{:>10}\n",
            "component", "count", "mean", "median", "p90", "p99", "min", "max", "stddev"
        );
        for snapshot in self.all_snapshots() {
            out.push_str(&snapshot.render_row());
            out.push('\n');
        }
        out
    }
}

impl Default for LatencyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `LatencyMetrics::start`.
pub struct Timer<'a> {
    registry: &'a LatencyMetrics,
    component: String,
    started_at: std::time::Instant,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.registry.record(&self.component, self.started_at.elapsed());
    }
}

static REGISTRY: once_cell::sync::Lazy<LatencyMetrics> = once_cell::sync::Lazy::new(LatencyMetrics::new);

/// Process-wide latency metrics registry, mirroring the
/// `phone_agent_core::retry::breaker_registry` convention.
pub fn latency_metrics() -> &'static LatencyMetrics {
    &REGISTRY
}

/// Per-turn timing breakdown persisted alongside the turn (§3 "Turn Timing
/// Record").
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TurnTiming {
    pub stt_ms: Option<f64>,
    pub llm_first_token_ms: Option<f64>,
    pub llm_total_ms: Option<f64>,
    pub tts_first_chunk_ms: Option<f64>,
    pub tts_total_ms: Option<f64>,
    pub turn_total_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_known_distribution() {
        let metrics = LatencyMetrics::new();
        for ms in [10, 20, 30, 40, 50, 60, 70, 80, 90, 100] {
            metrics.record("stt", Duration::from_millis(ms));
        }
        let snap = metrics.snapshot("stt").unwrap();
        assert_eq!(snap.count, 10);
        assert!((snap.median_ms - 60.0).abs() < 1.0 || (snap.median_ms - 50.0).abs() < 1.0);
        assert!(snap.p90_ms >= 90.0);
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let metrics = LatencyMetrics::new();
        for i in 0..(MAX_SAMPLES + 10) {
            metrics.record("x", Duration::from_millis(i as u64));
        }
        let snap = metrics.snapshot("x").unwrap();
        assert_eq!(snap.count, MAX_SAMPLES);
    }

    #[test]
    fn snapshot_carries_min_max_and_stddev() {
        let metrics = LatencyMetrics::new();
        for ms in [10, 20, 30] {
            metrics.record("stt", Duration::from_millis(ms));
        }
        let snap = metrics.snapshot("stt").unwrap();
        assert_eq!(snap.min_ms, 10.0);
        assert_eq!(snap.max_ms, 30.0);
        assert!(snap.stddev_ms > 0.0);
    }

    #[test]
    fn render_text_produces_a_header_and_one_row_per_component() {
        let metrics = LatencyMetrics::new();
        metrics.record("stt", Duration::from_millis(10));
        metrics.record("llm_total", Duration::from_millis(20));
        let table = metrics.render_text();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("component"));
        assert!(lines[1].contains("llm_total"));
        assert!(lines[2].contains("stt"));
    }

    #[test]
    fn exceeds_budget_detects_slow_p90() {
        let metrics = LatencyMetrics::new();
        for _ in 0..10 {
            metrics.record("tts_first_chunk", Duration::from_millis(900));
        }
        assert!(metrics.exceeds_budget("tts_first_chunk", Duration::from_millis(500)));
        assert!(!metrics.exceeds_budget("tts_first_chunk", Duration::from_millis(1500)));
    }
}
