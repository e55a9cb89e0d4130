//! dshub - versioning and publication for a dataset hub
//!
//! Datasets are grouped into concepts whose versions are numbered
//! `major.minor`. Each version is an independent copy of its dataset, rows
//! and files. Datasets are published to an archival registry as depositions
//! that carry a DOI and a version history.

pub mod cli;
pub mod domain;
pub mod registry;
pub mod storage;
pub mod versioning;

pub use domain::{Concept, Dataset, Deposition, Doi, Version, VersionNumber};
pub use versioning::{DatasetService, PublicationOrchestrator, VersioningError};
