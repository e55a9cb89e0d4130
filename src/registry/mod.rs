//! Archival registry integration
//!
//! - [`RegistryAdapter`] - the calls the versioning layer depends on
//! - [`DepositionStore`] - the draft/dirty/published state machine
//! - [`Fakenodo`] - in-process simulated registry serving the adapter

mod adapter;
mod deposition;
mod fakenodo;

pub use adapter::{FileSource, RegistryAdapter, RegistryError};
pub use deposition::{DepositionError, DepositionStore};
pub use fakenodo::Fakenodo;
