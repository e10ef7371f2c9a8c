//! Per-node CPU cost measurement.
//!
//! The RT side wraps each measured section in `start_timer()` /
//! `stop_timer()`, which pushes `(node, elapsed)` onto a bounded wait-free
//! ring. A background worker drains the ring periodically and folds the
//! entries into per-node min/avg/max, normalized to the block period
//! (`buffer_size / sample_rate`). When the ring is full, entries are
//! dropped silently — this is a measurement tool, not a guarantee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use atomic_float::AtomicF32;
use parking_lot::Mutex;

use crate::fifo::{SpinLock, SpscRing};
use crate::processor::ObjectId;

/// Depth of the timing log ring.
pub const MAX_LOG_ENTRIES: usize = 16384;

const UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Weight of the previous average when new entries are merged in.
const MERGE_ALPHA: f32 = 0.5;

/// Per-node timings as fractions of the block period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessTimings {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

impl Default for ProcessTimings {
    fn default() -> Self {
        Self {
            avg: 0.0,
            min: f32::MAX,
            max: 0.0,
        }
    }
}

struct TimingLogPoint {
    id: ObjectId,
    delta: Duration,
}

pub struct PerformanceTimer {
    enabled: AtomicBool,
    /// Block period in seconds; the normalization base. Written from the
    /// control side, read by the aggregation worker.
    period_secs: AtomicF32,
    entries: SpscRing<TimingLogPoint>,
    /// Widens the producer side to multiple RT threads. All producers in a
    /// given deployment must consistently use either the plain or the
    /// locked entry point.
    producer_lock: SpinLock,
    timings: Mutex<HashMap<ObjectId, ProcessTimings>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PerformanceTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(false),
            period_secs: AtomicF32::new(crate::AUDIO_CHUNK_SIZE as f32 / 48000.0),
            entries: SpscRing::with_capacity(MAX_LOG_ENTRIES),
            producer_lock: SpinLock::new(),
            timings: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// Set the normalization period from the session's audio configuration.
    pub fn set_timing_period(&self, sample_rate: f32, buffer_size: usize) {
        self.period_secs
            .store(buffer_size as f32 / sample_rate, Ordering::Release);
    }

    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Entry point for a timed section. `None` while timing is disabled.
    #[inline]
    pub fn start_timer(&self) -> Option<Instant> {
        if self.is_enabled() {
            Some(Instant::now())
        } else {
            None
        }
    }

    /// Exit point for a timed section. Single RT producer.
    #[inline]
    pub fn stop_timer(&self, start: Instant, node_id: ObjectId) {
        if self.is_enabled() {
            // Dropped silently when the ring is full
            let _ = self.entries.push(TimingLogPoint {
                id: node_id,
                delta: start.elapsed(),
            });
        }
    }

    /// Exit point safe to call concurrently from several RT threads.
    #[inline]
    pub fn stop_timer_rt_safe(&self, start: Instant, node_id: ObjectId) {
        if self.is_enabled() {
            let _guard = self.producer_lock.lock();
            let _ = self.entries.push(TimingLogPoint {
                id: node_id,
                delta: start.elapsed(),
            });
        }
    }

    /// Start the background aggregation worker. Idempotent.
    pub fn run(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.running.store(true, Ordering::Release);
        // Weak so the worker never keeps the timer alive by itself
        let timer = Arc::downgrade(self);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("vivace-perf-timer".to_owned())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    thread::sleep(UPDATE_INTERVAL);
                    match timer.upgrade() {
                        Some(timer) => timer.update_timings(),
                        None => break,
                    }
                }
            })
            .expect("failed to spawn timer worker");
        *worker = Some(handle);
    }

    /// Stop the aggregation worker and fold in any remaining entries.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.update_timings();
    }

    /// Drain the ring and merge into the per-node table. Called by the
    /// worker; public so embedders without the worker thread can pump it.
    pub fn update_timings(&self) {
        let period = self
            .period_secs
            .load(Ordering::Acquire)
            .max(f32::MIN_POSITIVE);

        struct Bucket {
            sum: f32,
            count: u32,
            min: f32,
            max: f32,
        }
        let mut fresh: HashMap<ObjectId, Bucket> = HashMap::new();

        while let Some(point) = self.entries.pop() {
            let normalized = point.delta.as_secs_f32() / period;
            let bucket = fresh.entry(point.id).or_insert(Bucket {
                sum: 0.0,
                count: 0,
                min: f32::MAX,
                max: 0.0,
            });
            bucket.sum += normalized;
            bucket.count += 1;
            bucket.min = bucket.min.min(normalized);
            bucket.max = bucket.max.max(normalized);
        }

        if fresh.is_empty() {
            return;
        }

        let mut timings = self.timings.lock();
        for (id, bucket) in fresh {
            let new = ProcessTimings {
                avg: bucket.sum / bucket.count as f32,
                min: bucket.min,
                max: bucket.max,
            };
            timings
                .entry(id)
                .and_modify(|old| {
                    old.avg = MERGE_ALPHA * old.avg + (1.0 - MERGE_ALPHA) * new.avg;
                    old.min = old.min.min(new.min);
                    old.max = old.max.max(new.max);
                })
                .or_insert(new);
        }
    }

    pub fn timings_for_node(&self, id: ObjectId) -> Option<ProcessTimings> {
        self.timings.lock().get(&id).copied()
    }

    pub fn clear_timings_for_node(&self, id: ObjectId) -> bool {
        self.timings.lock().remove(&id).is_some()
    }

    pub fn clear_all_timings(&self) {
        self.timings.lock().clear();
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for PerformanceTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceTimer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_timer_records_nothing() {
        let timer = PerformanceTimer::new();
        assert!(timer.start_timer().is_none());
        timer.stop_timer(Instant::now(), 1);
        timer.update_timings();
        assert!(timer.timings_for_node(1).is_none());
    }

    #[test]
    fn test_records_and_aggregates() {
        let timer = PerformanceTimer::new();
        timer.set_timing_period(48000.0, crate::AUDIO_CHUNK_SIZE);
        timer.enable(true);

        for _ in 0..10 {
            let start = timer.start_timer().unwrap();
            timer.stop_timer(start, 7);
        }
        timer.update_timings();

        let timings = timer.timings_for_node(7).unwrap();
        assert!(timings.avg >= 0.0);
        assert!(timings.min <= timings.max);
        assert!(timings.min <= timings.avg && timings.avg <= timings.max + f32::EPSILON);
    }

    #[test]
    fn test_merge_keeps_extremes() {
        let timer = PerformanceTimer::new();
        timer.set_timing_period(48000.0, crate::AUDIO_CHUNK_SIZE);
        timer.enable(true);

        let start = timer.start_timer().unwrap();
        timer.stop_timer(start, 3);
        timer.update_timings();
        let first = timer.timings_for_node(3).unwrap();

        let start = timer.start_timer().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        timer.stop_timer(start, 3);
        timer.update_timings();
        let merged = timer.timings_for_node(3).unwrap();

        assert!(merged.min <= first.min + f32::EPSILON);
        assert!(merged.max >= first.max);
    }

    #[test]
    fn test_rt_safe_variant_from_threads() {
        let timer = PerformanceTimer::new();
        timer.enable(true);
        let mut handles = Vec::new();
        for node in 0..4u32 {
            let timer = Arc::clone(&timer);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let start = timer.start_timer().unwrap();
                    timer.stop_timer_rt_safe(start, node + 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        timer.update_timings();
        for node in 1..=4u32 {
            assert!(timer.timings_for_node(node).is_some());
        }
    }

    #[test]
    fn test_clear() {
        let timer = PerformanceTimer::new();
        timer.enable(true);
        let start = timer.start_timer().unwrap();
        timer.stop_timer(start, 9);
        timer.update_timings();

        assert!(timer.clear_timings_for_node(9));
        assert!(!timer.clear_timings_for_node(9));

        let start = timer.start_timer().unwrap();
        timer.stop_timer(start, 9);
        timer.update_timings();
        timer.clear_all_timings();
        assert!(timer.timings_for_node(9).is_none());
    }

    #[test]
    fn test_worker_lifecycle() {
        let timer = PerformanceTimer::new();
        timer.enable(true);
        timer.run();
        let start = timer.start_timer().unwrap();
        timer.stop_timer(start, 2);
        timer.stop();
        assert!(timer.timings_for_node(2).is_some());
    }
}
