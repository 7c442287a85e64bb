use crate::config::ServerConfig;
use std::sync::Arc;
use studio_import::{CommandRunner, ImportSupervisor, ProcessRunner};

/// Shared application state
#[derive(Clone)]
pub struct ServerState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Owns every background import
    pub supervisor: ImportSupervisor,
}

impl ServerState {
    /// Create new server state running real processes
    pub fn new(config: ServerConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    /// Create server state with a custom command runner
    pub fn with_runner(config: ServerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let supervisor = ImportSupervisor::from_config(config.import.clone(), runner);
        Self {
            config: Arc::new(config),
            supervisor,
        }
    }
}
