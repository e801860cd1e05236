//! Raw OS counters: per-core CPU ticks, memory totals and core count.
//!
//! Everything here is an instantaneous read. Turning two reads into a
//! utilization figure is the job of [`crate::cpu`].

use std::sync::{Arc, Mutex};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed cpu line in /proc/stat: {0:?}")]
    Malformed(String),
    #[error("per-core tick counters are not available on this platform")]
    Unsupported,
    #[error("system counter handle poisoned")]
    Poisoned,
}

/// Tick counters of one logical core, plus the speed and model reported
/// at the moment of the read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoreTimes {
    pub user: u64,
    pub nice: u64,
    pub sys: u64,
    pub irq: u64,
    pub idle: u64,
    pub speed_mhz: u64,
    pub model: String,
}

/// Idle and total ticks, the only two quantities the delta needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickTotals {
    pub idle: u64,
    pub total: u64,
}

impl CoreTimes {
    pub fn totals(&self) -> TickTotals {
        TickTotals {
            idle: self.idle,
            total: self
                .user
                .saturating_add(self.nice)
                .saturating_add(self.sys)
                .saturating_add(self.idle)
                .saturating_add(self.irq),
        }
    }
}

impl TickTotals {
    /// Aggregate snapshot: sums the tick fields of every core.
    pub fn sum<'a, I: IntoIterator<Item = &'a CoreTimes>>(cores: I) -> Self {
        cores.into_iter().fold(Self::default(), |acc, core| {
            let t = core.totals();
            TickTotals {
                idle: acc.idle.saturating_add(t.idle),
                total: acc.total.saturating_add(t.total),
            }
        })
    }
}

/// Source of instantaneous host counters.
pub trait CounterSource: Send + Sync {
    fn cpu_core_times(&self) -> Result<Vec<CoreTimes>, CounterError>;
    fn total_memory_bytes(&self) -> Result<u64, CounterError>;
    fn free_memory_bytes(&self) -> Result<u64, CounterError>;
    fn logical_cpu_count(&self) -> Result<usize, CounterError>;
}

pub type SharedCounters = Arc<dyn CounterSource>;

/// Counters of the machine the agent runs on.
///
/// Model names, clock speeds and memory come from sysinfo. sysinfo only
/// exposes already-computed percentages, so on Linux the raw ticks are
/// read from `/proc/stat`.
pub struct HostCounters {
    sys: Mutex<System>,
}

impl HostCounters {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_frequency())
            .with_memory(MemoryRefreshKind::nothing().with_ram());
        let sys = System::new_with_specifics(refresh_kind);
        Self {
            sys: Mutex::new(sys),
        }
    }

    fn with_sys<T>(&self, f: impl FnOnce(&mut System) -> T) -> Result<T, CounterError> {
        let mut guard = self.sys.lock().map_err(|_| CounterError::Poisoned)?;
        Ok(f(&mut guard))
    }
}

impl Default for HostCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for HostCounters {
    fn cpu_core_times(&self) -> Result<Vec<CoreTimes>, CounterError> {
        let mut cores = read_core_ticks()?;
        // Speed can change between reads; refresh it on every snapshot.
        self.with_sys(|sys| {
            sys.refresh_cpu_specifics(CpuRefreshKind::nothing().with_frequency());
            for (core, cpu) in cores.iter_mut().zip(sys.cpus()) {
                core.speed_mhz = cpu.frequency();
                core.model = cpu.brand().trim().to_string();
            }
        })?;
        Ok(cores)
    }

    fn total_memory_bytes(&self) -> Result<u64, CounterError> {
        self.with_sys(|sys| {
            sys.refresh_memory();
            sys.total_memory()
        })
    }

    fn free_memory_bytes(&self) -> Result<u64, CounterError> {
        self.with_sys(|sys| {
            sys.refresh_memory();
            sys.available_memory()
        })
    }

    fn logical_cpu_count(&self) -> Result<usize, CounterError> {
        self.with_sys(|sys| sys.cpus().len())
    }
}

#[cfg(target_os = "linux")]
fn read_core_ticks() -> Result<Vec<CoreTimes>, CounterError> {
    const PATH: &str = "/proc/stat";
    let text = std::fs::read_to_string(PATH).map_err(|source| CounterError::Read {
        path: PATH,
        source,
    })?;
    parse_proc_stat(&text)
}

#[cfg(not(target_os = "linux"))]
fn read_core_ticks() -> Result<Vec<CoreTimes>, CounterError> {
    Err(CounterError::Unsupported)
}

/// Parses the per-core `cpuN` lines of `/proc/stat`.
///
/// Field order: user nice system idle iowait irq softirq steal ...
/// iowait, softirq and steal do not count towards the total.
pub fn parse_proc_stat(text: &str) -> Result<Vec<CoreTimes>, CounterError> {
    let mut cores = Vec::new();
    for line in text.lines() {
        let mut it = line.split_whitespace();
        let Some(label) = it.next() else { continue };
        // "cpu" alone is the kernel's own aggregate; we sum cores ourselves.
        let Some(idx) = label.strip_prefix("cpu") else {
            continue;
        };
        if idx.is_empty() || !idx.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let fields: Vec<u64> = it
            .take(6)
            .map(str::parse)
            .collect::<Result<_, _>>()
            .map_err(|_| CounterError::Malformed(line.to_string()))?;
        if fields.len() < 4 {
            return Err(CounterError::Malformed(line.to_string()));
        }
        cores.push(CoreTimes {
            user: fields[0],
            nice: fields[1],
            sys: fields[2],
            idle: fields[3],
            irq: fields.get(5).copied().unwrap_or(0),
            ..CoreTimes::default()
        });
    }
    Ok(cores)
}
