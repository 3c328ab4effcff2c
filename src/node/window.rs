//! Bucketed rolling counters.
//!
//! A window of `sample_count` buckets covers `interval_ms`. Each bucket is stamped
//! with the start of the time slice it currently counts; a bucket whose stamp is
//! older than the slice being written is reset before use. Counter updates are
//! plain atomic adds, only the stale-bucket reset takes a lock.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds on a process-local monotonic clock.
pub fn current_time_millis() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// Events recorded per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    Pass,
    Block,
    Exception,
    Success,
    Rt,
}

impl MetricEvent {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        match self {
            MetricEvent::Pass => 0,
            MetricEvent::Block => 1,
            MetricEvent::Exception => 2,
            MetricEvent::Success => 3,
            MetricEvent::Rt => 4,
        }
    }
}

/// Shape of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub sample_count: u32,
    pub interval_ms: u32,
}

impl WindowSpec {
    pub const fn new(sample_count: u32, interval_ms: u32) -> Self {
        Self {
            sample_count,
            interval_ms,
        }
    }

    /// One minute of one-second buckets.
    pub const fn minute() -> Self {
        Self::new(60, 60_000)
    }

    pub fn bucket_length_ms(&self) -> u64 {
        (self.interval_ms / self.sample_count.max(1)).max(1) as u64
    }

    pub fn interval_sec(&self) -> f64 {
        self.interval_ms as f64 / 1000.0
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self::new(2, 1000)
    }
}

struct Bucket {
    start_ms: AtomicU64,
    counters: [AtomicU64; MetricEvent::COUNT],
    min_rt: AtomicU64,
}

impl Bucket {
    fn new() -> Self {
        Self {
            start_ms: AtomicU64::new(0),
            counters: Default::default(),
            min_rt: AtomicU64::new(u64::MAX),
        }
    }

    fn reset(&self, start_ms: u64) {
        for c in &self.counters {
            c.store(0, Ordering::Relaxed);
        }
        self.min_rt.store(u64::MAX, Ordering::Relaxed);
        self.start_ms.store(start_ms, Ordering::Release);
    }

    fn get(&self, event: MetricEvent) -> u64 {
        self.counters[event.index()].load(Ordering::Relaxed)
    }
}

/// A rolling window of atomic counters.
pub struct SlidingWindow {
    spec: WindowSpec,
    bucket_ms: u64,
    buckets: Box<[Bucket]>,
    reset_lock: Mutex<()>,
}

impl SlidingWindow {
    pub fn new(spec: WindowSpec) -> Self {
        let n = spec.sample_count.max(1) as usize;
        Self {
            spec,
            bucket_ms: spec.bucket_length_ms(),
            buckets: (0..n).map(|_| Bucket::new()).collect(),
            reset_lock: Mutex::new(()),
        }
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    fn bucket_at(&self, now_ms: u64) -> &Bucket {
        let idx = ((now_ms / self.bucket_ms) % self.buckets.len() as u64) as usize;
        let start = now_ms - now_ms % self.bucket_ms;
        let bucket = &self.buckets[idx];
        loop {
            let seen = bucket.start_ms.load(Ordering::Acquire);
            if seen >= start {
                // Current, or stamped ahead of a caller that read the clock late.
                return bucket;
            }
            match self.reset_lock.try_lock() {
                Ok(_guard) => {
                    if bucket.start_ms.load(Ordering::Acquire) < start {
                        bucket.reset(start);
                    }
                    return bucket;
                }
                Err(_) => std::thread::yield_now(),
            }
        }
    }

    fn is_live(&self, bucket: &Bucket, now_ms: u64) -> bool {
        let start = bucket.start_ms.load(Ordering::Acquire);
        start <= now_ms && now_ms - start < self.spec.interval_ms as u64
    }

    pub fn add(&self, event: MetricEvent, n: u64) {
        self.add_at(current_time_millis(), event, n);
    }

    pub fn add_at(&self, now_ms: u64, event: MetricEvent, n: u64) {
        self.bucket_at(now_ms).counters[event.index()].fetch_add(n, Ordering::Relaxed);
    }

    /// Adds a response time sample, tracking the bucket minimum alongside the sum.
    pub fn add_rt_at(&self, now_ms: u64, rt_ms: u64) {
        let bucket = self.bucket_at(now_ms);
        bucket.counters[MetricEvent::Rt.index()].fetch_add(rt_ms, Ordering::Relaxed);
        bucket.min_rt.fetch_min(rt_ms, Ordering::Relaxed);
    }

    pub fn sum(&self, event: MetricEvent) -> u64 {
        self.sum_at(current_time_millis(), event)
    }

    pub fn sum_at(&self, now_ms: u64, event: MetricEvent) -> u64 {
        self.buckets
            .iter()
            .filter(|b| self.is_live(b, now_ms))
            .map(|b| b.get(event))
            .sum()
    }

    /// Largest single-bucket value within the window.
    pub fn max_at(&self, now_ms: u64, event: MetricEvent) -> u64 {
        self.buckets
            .iter()
            .filter(|b| self.is_live(b, now_ms))
            .map(|b| b.get(event))
            .max()
            .unwrap_or(0)
    }

    pub fn min_rt_at(&self, now_ms: u64) -> Option<u64> {
        self.buckets
            .iter()
            .filter(|b| self.is_live(b, now_ms))
            .map(|b| b.min_rt.load(Ordering::Relaxed))
            .filter(|rt| *rt != u64::MAX)
            .min()
    }

    /// Value of the bucket covering the slice just before the current one.
    pub fn previous_at(&self, now_ms: u64, event: MetricEvent) -> u64 {
        let Some(prev) = now_ms.checked_sub(self.bucket_ms) else {
            return 0;
        };
        let start = prev - prev % self.bucket_ms;
        let idx = ((prev / self.bucket_ms) % self.buckets.len() as u64) as usize;
        let bucket = &self.buckets[idx];
        if bucket.start_ms.load(Ordering::Acquire) == start {
            bucket.get(event)
        } else {
            0
        }
    }

    pub fn reset(&self) {
        let _guard = self
            .reset_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for b in self.buckets.iter() {
            b.reset(0);
        }
    }
}

impl std::fmt::Debug for SlidingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("spec", &self.spec)
            .finish()
    }
}
