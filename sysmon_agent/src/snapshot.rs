//! Assembles one [`SystemReport`] from the enabled collectors.

use std::sync::Arc;

use crate::config::Config;
use crate::counters::{CounterError, SharedCounters};
use crate::cpu::CpuUsageEstimator;
use crate::format::{display_or_na, truncate_display};
use crate::types::{CoreReport, CpuReport, RamReport, SystemReport};

const GIB: f64 = (1024u64 * 1024 * 1024) as f64;

pub struct SnapshotBuilder {
    config: Arc<Config>,
    counters: SharedCounters,
    cpu: CpuUsageEstimator,
}

impl SnapshotBuilder {
    pub fn new(config: Arc<Config>, counters: SharedCounters) -> Self {
        let cpu = CpuUsageEstimator::new(counters.clone(), config.cpu_window);
        Self {
            config,
            counters,
            cpu,
        }
    }

    /// Collects every enabled section. With CPU enabled this takes one
    /// sampling window, two with the per-core breakdown.
    pub async fn build(&self) -> Result<SystemReport, CounterError> {
        let cpu = if self.config.cpu {
            self.build_cpu().await?
        } else {
            CpuReport::disabled()
        };
        let ram = if self.config.ram {
            self.build_ram()?
        } else {
            RamReport::disabled()
        };
        Ok(SystemReport { cpu, ram })
    }

    async fn build_cpu(&self) -> Result<CpuReport, CounterError> {
        let count = self.counters.logical_cpu_count()?;
        let usage = self.cpu.estimate_aggregate().await?;
        let cores = if self.config.cpu_cores {
            self.cpu
                .estimate_per_core()
                .await?
                .into_iter()
                .map(|c| CoreReport {
                    index: c.index,
                    model: c.model,
                    speed: c.speed_mhz,
                    usage: display_or_na(c.usage),
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(CpuReport {
            count: count.to_string(),
            usage: display_or_na(usage),
            cores,
        })
    }

    fn build_ram(&self) -> Result<RamReport, CounterError> {
        let total = self.counters.total_memory_bytes()? as f64;
        let free = self.counters.free_memory_bytes()? as f64;
        Ok(RamReport {
            total: truncate_display(total / GIB),
            // total == 0 yields NaN, rendered as N/A
            usage: truncate_display((total - free) * 100.0 / total),
        })
    }
}
