//! Domain models for dshub
//!
//! Concepts, versions, datasets and depositions, without any I/O concerns.

mod dataset;
mod deposition;
mod id;
mod version;

pub use dataset::{
    human_size, split_tags, Dataset, DatasetError, DatasetId, DatasetKind, DatasetMetadata,
    FileEntry, FileEntryId, FileGroup, FileGroupId, MetadataId, OwnerId, PublicationType,
    TabularPayload,
};
pub use deposition::{
    content_type_for, Deposition, DepositionId, DepositionMetadata, DepositionStatus,
    FileDescriptor, MetadataPatch, PublishReceipt, VersionChanges, VersionEntry,
};
pub use id::{ConceptualId, Doi, IdError, DEFAULT_DOI_PREFIX};
pub use version::{Concept, ConceptKey, Version, VersionKey, VersionNumber};
