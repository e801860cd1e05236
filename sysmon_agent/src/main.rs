//! sysmon_agent: streams host CPU and memory utilization over WebSocket.

use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;

use sysmon_agent::config::{ConfigError, USAGE};
use sysmon_agent::{start, Config, HostCounters};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = match Config::from_args(std::env::args()) {
        Err(ConfigError::Help(usage)) => {
            println!("{usage}");
            return Ok(ExitCode::SUCCESS);
        }
        parsed => parsed.context(USAGE)?,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let counters = Arc::new(HostCounters::new());
    // Bind and serve failures are already logged by start(). Nothing else
    // runs in this process, so a failed start ends it with a failure status.
    match start(config, counters).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}
