//! Shared agent state: read-only configuration and the snapshot builder.

use std::sync::Arc;

use crate::config::Config;
use crate::counters::SharedCounters;
use crate::snapshot::SnapshotBuilder;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub builder: Arc<SnapshotBuilder>,
}

impl AppState {
    pub fn new(config: Config, counters: SharedCounters) -> Self {
        let config = Arc::new(config);
        let builder = Arc::new(SnapshotBuilder::new(config.clone(), counters));
        Self { config, builder }
    }
}
