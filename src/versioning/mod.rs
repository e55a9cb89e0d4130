//! # Versioning
//!
//! Everything that turns datasets into versioned, published records:
//!
//! - [`VersionLedger`] - concepts and their `(major, minor)` versions
//! - [`CloneEngine`] - deep copies of datasets, rows and bytes
//! - [`PublicationOrchestrator`] - new versions, deposition sync, metadata edits
//! - [`DatasetService`] - what the rest of the application calls
//!
//! Components below the orchestrator take a `&Connection`; the orchestrator
//! and the service own the transaction boundary.

mod clone;
mod error;
mod ledger;
mod orchestrator;
mod service;

pub use clone::{CloneEngine, CloneOutcome, SkippedFile};
pub use error::{Result, VersioningError};
pub use ledger::VersionLedger;
pub use orchestrator::{
    DoiResolution, NewVersionOutcome, NewVersionRequest, NumberChoice, PublicationOrchestrator,
    RegistryUpdate, SyncReceipt, SyncStatus,
};
pub use service::{DatasetService, DownloadReceipt, NewDataset};
