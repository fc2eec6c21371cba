use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// Manages per-fleet engines. Each fleet gets its own Engine + WAL +
/// compactor. Fleet = database name from the pgwire connection, so one
/// process can serve several independent operators (and tests get cheap
/// isolation by picking a fresh name).
pub struct FleetManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl FleetManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given fleet.
    pub fn get_or_create(&self, fleet: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(fleet) {
            return Ok(engine.value().clone());
        }
        if fleet.len() > MAX_FLEET_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "fleet name too long",
            ));
        }
        if self.engines.len() >= MAX_FLEETS {
            return Err(std::io::Error::other("too many fleets"));
        }

        // Sanitize fleet name to prevent path traversal
        let safe_name: String = fleet
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty fleet name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::new(wal_path)?);

        // Spawn the WAL compactor for this fleet
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(fleet.to_string(), engine.clone());
        metrics::gauge!(crate::observability::FLEETS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
