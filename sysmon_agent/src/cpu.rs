//! CPU utilization from two tick snapshots taken a fixed window apart.

use std::time::Duration;
use tokio::time::sleep;

use crate::counters::{CoreTimes, CounterError, SharedCounters, TickTotals};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1000);

/// Non-idle share of the ticks elapsed between `start` and `end`, in percent.
///
/// `None` when no ticks elapsed (suspended host clock, counters reset):
/// the ratio is undefined and must not leak out as NaN.
pub fn usage_percent(start: TickTotals, end: TickTotals) -> Option<f64> {
    let idle = end.idle.saturating_sub(start.idle) as f64;
    let total = end.total.saturating_sub(start.total) as f64;
    let usage = (1.0 - idle / total) * 100.0;
    usage.is_finite().then_some(usage)
}

/// Usage of one logical core over the sampling window.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreUsage {
    /// 1-based position in the OS core list.
    pub index: u32,
    pub model: String,
    pub speed_mhz: u64,
    pub usage: Option<f64>,
}

/// Two-sample estimator. Each call reads the counters, sleeps for the
/// window without blocking the runtime, and reads them again.
#[derive(Clone)]
pub struct CpuUsageEstimator {
    counters: SharedCounters,
    window: Duration,
}

impl CpuUsageEstimator {
    pub fn new(counters: SharedCounters, window: Duration) -> Self {
        Self { counters, window }
    }

    async fn sample_pair(&self) -> Result<(Vec<CoreTimes>, Vec<CoreTimes>), CounterError> {
        let start = self.counters.cpu_core_times()?;
        sleep(self.window).await;
        let end = self.counters.cpu_core_times()?;
        Ok((start, end))
    }

    /// Usage across all cores combined.
    pub async fn estimate_aggregate(&self) -> Result<Option<f64>, CounterError> {
        let (start, end) = self.sample_pair().await?;
        Ok(usage_percent(
            TickTotals::sum(&start),
            TickTotals::sum(&end),
        ))
    }

    /// Usage of every core, in OS order. Speed and model come from the
    /// second read since they may have changed during the window.
    pub async fn estimate_per_core(&self) -> Result<Vec<CoreUsage>, CounterError> {
        let (start, end) = self.sample_pair().await?;
        Ok(end
            .iter()
            .enumerate()
            .map(|(i, core)| CoreUsage {
                index: (i + 1) as u32,
                model: core.model.clone(),
                speed_mhz: core.speed_mhz,
                usage: start
                    .get(i)
                    .and_then(|before| usage_percent(before.totals(), core.totals())),
            })
            .collect())
    }
}
