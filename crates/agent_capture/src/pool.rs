use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::stream::{self, StreamExt};
use sysinfo::System;
use tracing::debug;

const DEFAULT_CONCURRENCY: usize = 4;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_MIN_AVAILABLE_RATIO: f64 = 0.10;

/// Reports whether the host is too loaded to admit more work.
pub trait PressureGauge: Send + Sync {
    fn under_pressure(&self) -> bool;
}

/// Gauge comparing available to total system memory.
#[derive(Debug, Clone)]
pub struct MemoryPressureGauge {
    min_available_ratio: f64,
}

impl MemoryPressureGauge {
    pub fn new(min_available_ratio: f64) -> Self {
        Self {
            min_available_ratio: min_available_ratio.clamp(0.0, 1.0),
        }
    }

    /// `available / total` memory, or `None` when the host reports no total.
    pub fn available_ratio(&self) -> Option<f64> {
        let mut system = System::new();
        system.refresh_memory();
        available_ratio(system.available_memory(), system.total_memory())
    }
}

impl Default for MemoryPressureGauge {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_AVAILABLE_RATIO)
    }
}

impl PressureGauge for MemoryPressureGauge {
    fn under_pressure(&self) -> bool {
        self.available_ratio()
            .is_some_and(|ratio| ratio < self.min_available_ratio)
    }
}

fn available_ratio(available: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(available as f64 / total as f64)
}

/// Worker pool settings.
#[derive(Clone)]
pub struct PoolOptions {
    /// Maximum items in flight (default: 4, at least 1).
    pub concurrency: usize,
    pub gauge: Option<Arc<dyn PressureGauge>>,
    /// Upper bound for the admission backoff while under pressure.
    pub max_backoff: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            gauge: None,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_gauge(mut self, gauge: Arc<dyn PressureGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("concurrency", &self.concurrency)
            .field("gauge", &self.gauge.is_some())
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs `f` over `items` with at most `options.concurrency` in flight.
///
/// Every item gets its own `Result`; a failure never cancels siblings. Results come back in
/// input order. With a gauge configured, each item waits (exponential backoff) while the gauge
/// reports pressure, unless nothing else is running.
pub async fn run_pool<T, R, E, F, Fut>(items: Vec<T>, options: &PoolOptions, f: F) -> Vec<Result<R, E>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let total = items.len();
    let concurrency = options.concurrency.max(1);
    let in_flight = Arc::new(AtomicUsize::new(0));
    let f = &f;

    let mut indexed: Vec<(usize, Result<R, E>)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let in_flight = Arc::clone(&in_flight);
            let gauge = options.gauge.clone();
            let max_backoff = options.max_backoff;
            async move {
                if let Some(gauge) = gauge {
                    admit(index, gauge.as_ref(), &in_flight, max_backoff).await;
                }
                let _guard = InFlight::enter(&in_flight);
                (index, f(item).await)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    debug!(total, concurrency, "pool drained");
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, result)| result).collect()
}

async fn admit(index: usize, gauge: &dyn PressureGauge, in_flight: &AtomicUsize, max_backoff: Duration) {
    let mut backoff = INITIAL_BACKOFF.min(max_backoff);
    while in_flight.load(Ordering::SeqCst) > 0 && gauge.under_pressure() {
        debug!(index, ?backoff, "under pressure, delaying admission");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn keeps_input_order_and_per_item_errors() {
        let options = PoolOptions::new().with_concurrency(3);
        let results = run_pool(vec![30u64, 5, 20, 1], &options, |delay| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if delay == 20 {
                Err(format!("item {delay} failed"))
            } else {
                Ok(delay * 2)
            }
        })
        .await;

        assert_eq!(
            results,
            vec![Ok(60), Ok(10), Err("item 20 failed".to_string()), Ok(2)]
        );
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let options = PoolOptions::new().with_concurrency(2);

        let results = run_pool((0..8).collect(), &options, |n: u32| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(n)
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(PoolOptions::new().with_concurrency(0).concurrency, 1);
    }

    struct Toggle(AtomicBool);

    impl PressureGauge for Toggle {
        fn under_pressure(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn pressure_serializes_admission() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let options = PoolOptions::new()
            .with_concurrency(4)
            .with_gauge(Arc::new(Toggle(AtomicBool::new(true))))
            .with_max_backoff(Duration::from_millis(5));

        let results = run_pool((0..4).collect(), &options, |n: u32| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ()>(n)
            }
        })
        .await;

        assert_eq!(results, vec![Ok(0), Ok(1), Ok(2), Ok(3)]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memory_gauge_compares_against_the_threshold() {
        assert_eq!(available_ratio(4, 16), Some(0.25));
        assert_eq!(available_ratio(0, 0), None);

        let gauge = MemoryPressureGauge::default();
        let ratio = gauge.available_ratio().expect("host reports total memory");
        assert!((0.0..=1.0).contains(&ratio));
        assert!(!MemoryPressureGauge::new(0.0).under_pressure());
        assert!(MemoryPressureGauge::new(7.0).under_pressure() || ratio >= 1.0);
    }
}
