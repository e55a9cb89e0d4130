//! Hub resources opened once per command

use anyhow::{Context, Result};

use crate::domain::OwnerId;
use crate::registry::Fakenodo;
use crate::storage::{Database, Hub};
use crate::versioning::{DatasetService, PublicationOrchestrator};

pub struct Session {
    hub: Hub,
    db: Database,
    registry: Fakenodo,
}

impl Session {
    /// Opens the hub containing the current directory
    pub fn open() -> Result<Self> {
        let hub = Hub::open_current()?;
        let db = hub.database().context("Failed to open hub database")?;
        let registry = hub.registry()?;

        Ok(Self { hub, db, registry })
    }

    pub fn registry(&self) -> &Fakenodo {
        &self.registry
    }

    /// Acting user
    pub fn owner(&self) -> OwnerId {
        self.hub.config().global.effective_user()
    }

    pub fn service(&self) -> Result<DatasetService<'_>> {
        let orchestrator = PublicationOrchestrator::new(
            &self.db,
            &self.registry,
            self.hub.file_storage()?,
            self.hub.domain(),
        );
        Ok(DatasetService::new(orchestrator))
    }
}
