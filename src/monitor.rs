//! Performance Monitor
//!
//! Scoped timing around every pipeline stage plus process-level CPU and memory
//! sampling.
//!
//! # Design Notes
//! - `measure()` returns a guard that records elapsed time on drop, so a stage
//!   that panics still gets its timing recorded during unwinding.
//! - The callback thread only ever `try_lock`s the timing table. A contended
//!   sample is dropped rather than waited for.
//! - CPU and memory come from `/proc/self`; on other platforms they read as zero.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::EngineResult;

// Linux defaults; the values are not queried at runtime.
const CLOCK_TICKS_PER_SEC: f64 = 100.0;
const PAGE_SIZE_BYTES: f64 = 4096.0;

#[derive(Debug, Clone, Copy, Default)]
struct StageTiming {
    total_secs: f64,
    count: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct MemoryUsage {
    pub rss_mb: f64,
    pub vms_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub total_runtime_secs: f64,
    /// Average stage time in milliseconds.
    pub average_timings: BTreeMap<String, f64>,
    pub cpu_percent: f64,
    pub memory: MemoryUsage,
}

pub struct PerformanceMonitor {
    started: Instant,
    timings: Mutex<BTreeMap<&'static str, StageTiming>>,
    last_cpu: Mutex<Option<(Instant, f64)>>,
}

pub struct MeasureGuard<'a> {
    monitor: &'a PerformanceMonitor,
    name: &'static str,
    start: Instant,
}

impl Drop for MeasureGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        self.monitor.record(self.name, elapsed);
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            timings: Mutex::new(BTreeMap::new()),
            last_cpu: Mutex::new(None),
        }
    }

    pub fn measure(&self, name: &'static str) -> MeasureGuard<'_> {
        MeasureGuard {
            monitor: self,
            name,
            start: Instant::now(),
        }
    }

    pub fn record(&self, name: &'static str, secs: f64) {
        if let Ok(mut t) = self.timings.try_lock() {
            let e = t.entry(name).or_default();
            e.total_secs += secs;
            e.count += 1;
        }
    }

    /// Average time per stage in milliseconds.
    pub fn average_timings_ms(&self) -> BTreeMap<String, f64> {
        let t = match self.timings.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        t.iter()
            .filter(|(_, v)| v.count > 0)
            .map(|(k, v)| (k.to_string(), 1000.0 * v.total_secs / v.count as f64))
            .collect()
    }

    pub fn average_ms(&self, name: &str) -> Option<f64> {
        self.average_timings_ms().get(name).copied()
    }

    pub fn runtime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Process CPU use since the previous call (or since start on the first call).
    pub fn cpu_percent(&self) -> f64 {
        let Some(cpu_now) = read_process_cpu_secs() else {
            return 0.0;
        };
        let now = Instant::now();
        let mut last = match self.last_cpu.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (t0, c0) = last.unwrap_or((self.started, 0.0));
        *last = Some((now, cpu_now));
        let wall = now.duration_since(t0).as_secs_f64();
        if wall <= 1e-6 {
            return 0.0;
        }
        (100.0 * (cpu_now - c0) / wall).max(0.0)
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        read_process_memory().unwrap_or_default()
    }

    pub fn report(&self) -> PerformanceReport {
        PerformanceReport {
            total_runtime_secs: self.runtime_secs(),
            average_timings: self.average_timings_ms(),
            cpu_percent: self.cpu_percent(),
            memory: self.memory_usage(),
        }
    }

    pub fn save_statistics(&self, path: &Path) -> EngineResult<()> {
        let report = self.report();
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)?;
        log::info!("performance statistics written to {}", path.display());
        Ok(())
    }
}

fn read_process_cpu_secs() -> Option<f64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Fields after the parenthesised command name; utime and stime are 14 and 15.
    let rest = &stat[stat.rfind(')')? + 2..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: f64 = fields.get(11)?.parse().ok()?;
    let stime: f64 = fields.get(12)?.parse().ok()?;
    Some((utime + stime) / CLOCK_TICKS_PER_SEC)
}

fn read_process_memory() -> Option<MemoryUsage> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut it = statm.split_whitespace();
    let vms_pages: f64 = it.next()?.parse().ok()?;
    let rss_pages: f64 = it.next()?.parse().ok()?;
    let mb = PAGE_SIZE_BYTES / (1024.0 * 1024.0);
    Some(MemoryUsage {
        rss_mb: rss_pages * mb,
        vms_mb: vms_pages * mb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_records_average() {
        let m = PerformanceMonitor::new();
        m.record("reverb", 0.002);
        m.record("reverb", 0.004);
        let avg = m.average_ms("reverb").unwrap();
        assert!((avg - 3.0).abs() < 1e-9);

        {
            let _g = m.measure("router");
        }
        assert!(m.average_ms("router").is_some());
        assert!(m.average_ms("missing").is_none());
    }

    #[test]
    fn test_report_is_serializable() {
        let m = PerformanceMonitor::new();
        m.record("chain", 0.001);
        let json = serde_json::to_string(&m.report()).unwrap();
        assert!(json.contains("average_timings"));
        assert!(json.contains("chain"));
    }

    #[test]
    fn test_cpu_percent_non_negative() {
        let m = PerformanceMonitor::new();
        assert!(m.cpu_percent() >= 0.0);
        assert!(m.memory_usage().rss_mb >= 0.0);
    }
}
