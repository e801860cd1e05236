//! Push-based host monitor: samples CPU and memory utilization and streams
//! JSON snapshots to every connected WebSocket client.

pub mod config;
pub mod counters;
pub mod cpu;
pub mod format;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod types;
pub mod ws;

pub use config::Config;
pub use counters::{CounterSource, HostCounters};
pub use server::{start, MonitorServer};
