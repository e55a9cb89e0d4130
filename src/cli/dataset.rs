//! Dataset CLI commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use super::output::Output;
use super::session::Session;
use crate::domain::{
    human_size, split_tags, Dataset, DatasetId, DatasetKind, MetadataPatch, PublicationType,
    TabularPayload,
};
use crate::storage::SyncFilter;
use crate::versioning::{NewDataset, SyncStatus};

#[derive(Subcommand)]
pub enum DatasetCommands {
    /// Create a dataset from CSV files (version 1.0)
    Create {
        /// Dataset title
        #[arg(long)]
        title: String,

        /// Dataset description
        #[arg(long)]
        description: String,

        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,

        /// Publication type (e.g. sales, rankings, other)
        #[arg(long, default_value = "none")]
        publication_type: String,

        /// DOI of a related publication
        #[arg(long)]
        publication_doi: Option<String>,

        /// Number of data rows
        #[arg(long)]
        rows: Option<i64>,

        /// CSV files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List your datasets
    List {
        /// Only datasets published to the registry
        #[arg(long, conflicts_with = "local")]
        synced: bool,

        /// Only datasets not yet published
        #[arg(long)]
        local: bool,
    },

    /// Show dataset details
    Show {
        /// Dataset ID
        id: DatasetId,
    },

    /// Edit dataset metadata (also patches a linked deposition)
    Edit {
        /// Dataset ID
        id: DatasetId,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Comma-separated tags, replacing the current ones
        #[arg(long)]
        tags: Option<String>,

        #[arg(long)]
        publication_type: Option<String>,
    },

    /// Package a dataset's files as a zip archive
    Download {
        /// Dataset ID
        id: DatasetId,

        /// Archive path, or a directory to write dataset_<id>.zip into
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
    },

    /// Delete a dataset and its files
    Delete {
        /// Dataset ID
        id: DatasetId,
    },
}

pub fn run(cmd: DatasetCommands, output: &Output) -> Result<()> {
    let session = Session::open()?;

    match cmd {
        DatasetCommands::Create {
            title,
            description,
            tags,
            publication_type,
            publication_doi,
            rows,
            files,
        } => {
            let publication_type: PublicationType = publication_type.parse()?;
            let form = NewDataset {
                owner_id: session.owner(),
                title,
                description,
                publication_type,
                publication_doi,
                tags,
                kind: DatasetKind::Tabular(TabularPayload {
                    rows_count: rows,
                    schema_json: None,
                }),
                files,
            };
            create(&session, output, form)
        }
        DatasetCommands::List { synced, local } => {
            let filter = match (synced, local) {
                (true, _) => SyncFilter::Synced,
                (_, true) => SyncFilter::Local,
                _ => SyncFilter::All,
            };
            list(&session, output, filter)
        }
        DatasetCommands::Show { id } => show(&session, output, id),
        DatasetCommands::Edit {
            id,
            title,
            description,
            tags,
            publication_type,
        } => {
            let mut patch = MetadataPatch {
                title,
                description,
                tags: None,
                publication_type,
                publication_doi: None,
            };
            if let Some(tags) = tags {
                patch = patch.with_tag_list(split_tags(&tags));
            }
            edit(&session, output, id, patch)
        }
        DatasetCommands::Download { id, output: dest } => download(&session, output, id, dest),
        DatasetCommands::Delete { id } => delete(&session, output, id),
    }
}

fn create(session: &Session, output: &Output, form: NewDataset) -> Result<()> {
    let service = session.service()?;
    let dataset = service
        .create_from_form(form)
        .context("Failed to create dataset")?;

    if output.is_json() {
        output.data(&dataset_json(&dataset));
    } else {
        output.success(&format!(
            "Created dataset {} ({}) version {}",
            dataset.id,
            dataset.metadata.title,
            dataset.version_label().unwrap_or_default()
        ));
    }

    Ok(())
}

fn list(session: &Session, output: &Output, filter: SyncFilter) -> Result<()> {
    let service = session.service()?;
    let datasets = service.list(session.owner(), filter)?;

    if output.is_json() {
        let items: Vec<_> = datasets.iter().map(dataset_json).collect();
        output.data(&items);
    } else if datasets.is_empty() {
        println!("No datasets found.");
    } else {
        println!("{:<6} {:<8} {:<8} {:<10} TITLE", "ID", "VERSION", "STATUS", "SIZE");
        println!("{}", "-".repeat(70));
        for dataset in &datasets {
            println!(
                "{:<6} {:<8} {:<8} {:<10} {}",
                dataset.id,
                dataset.version_label().unwrap_or_else(|| "-".to_string()),
                SyncStatus::of(dataset).as_str(),
                dataset.total_size_human(),
                dataset.metadata.title
            );
        }
    }

    Ok(())
}

fn show(session: &Session, output: &Output, id: DatasetId) -> Result<()> {
    let service = session.service()?;
    let dataset = service.get(id)?;

    if output.is_json() {
        output.data(&dataset_json(&dataset));
        return Ok(());
    }

    let meta = &dataset.metadata;
    println!("Dataset: {} ({})", dataset.id, dataset.kind.label());
    println!("Title: {}", meta.title);
    println!("Description: {}", meta.description);
    println!("Type: {}", meta.publication_type.display_name());
    if let Some(tags) = meta.tags.as_deref().filter(|t| !t.is_empty()) {
        println!("Tags: {}", tags);
    }
    println!(
        "Version: {}",
        dataset.version_label().unwrap_or_else(|| "unversioned".to_string())
    );
    println!("Status: {}", SyncStatus::of(&dataset).as_str());
    if let Some(doi) = &meta.dataset_doi {
        println!("DOI: {}", doi);
    }
    if let Some(url) = &meta.publication_doi {
        println!("Publication DOI: {}", url);
    }
    if let Some(deposition_id) = meta.deposition_id {
        println!("Deposition: {}", deposition_id);
    }
    println!("Created: {}", dataset.created_at.format("%Y-%m-%d %H:%M"));
    println!("Downloads: {}", dataset.downloads);

    println!(
        "\nFiles ({}, {}):",
        dataset.files_count(),
        dataset.total_size_human()
    );
    for file in dataset.files() {
        println!("  {:<30} {:>12}  {}", file.name, human_size(file.size), file.checksum);
    }

    Ok(())
}

fn edit(session: &Session, output: &Output, id: DatasetId, patch: MetadataPatch) -> Result<()> {
    if patch.is_empty() {
        anyhow::bail!("Nothing to update. Pass --title, --description, --tags or --publication-type.");
    }

    let service = session.service()?;
    let dataset = service.orchestrator().edit_metadata(id, &patch)?;

    if output.is_json() {
        output.data(&dataset_json(&dataset));
    } else {
        output.success(&format!("Updated dataset {}", dataset.id));
    }

    Ok(())
}

fn download(session: &Session, output: &Output, id: DatasetId, dest: PathBuf) -> Result<()> {
    let service = session.service()?;
    let receipt = service
        .download(id, &dest)
        .with_context(|| format!("Failed to package dataset {}", id))?;

    if output.is_json() {
        output.data(&receipt);
    } else {
        output.success(&format!(
            "Wrote {} ({} files, download #{})",
            receipt.archive.display(),
            receipt.files,
            receipt.downloads
        ));
    }

    Ok(())
}

fn delete(session: &Session, output: &Output, id: DatasetId) -> Result<()> {
    let service = session.service()?;
    let dataset = service.delete(id)?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": dataset.id,
            "deleted": true,
        }));
    } else {
        output.success(&format!("Deleted dataset {} ({})", dataset.id, dataset.metadata.title));
    }

    Ok(())
}

pub(super) fn dataset_json(dataset: &Dataset) -> serde_json::Value {
    let meta = &dataset.metadata;
    serde_json::json!({
        "id": dataset.id,
        "owner_id": dataset.owner_id,
        "title": meta.title,
        "description": meta.description,
        "publication_type": meta.publication_type.as_str(),
        "publication_doi": meta.publication_doi,
        "tags": meta.tag_list(),
        "kind": dataset.kind,
        "version": dataset.version_label(),
        "status": SyncStatus::of(dataset),
        "dataset_doi": meta.dataset_doi,
        "deposition_id": meta.deposition_id,
        "files_count": dataset.files_count(),
        "total_size": dataset.total_size(),
        "downloads": dataset.downloads,
        "files": dataset.files().collect::<Vec<_>>(),
        "created_at": dataset.created_at,
    })
}
