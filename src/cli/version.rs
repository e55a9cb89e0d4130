//! Version CLI commands

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use super::output::Output;
use super::session::Session;
use crate::domain::{DatasetId, Version};
use crate::versioning::{NewVersionRequest, RegistryUpdate};

#[derive(Subcommand)]
pub enum VersionCommands {
    /// Create the next version of a dataset
    New {
        /// Dataset ID of any version of the concept
        dataset: DatasetId,

        /// Bump the major number instead of the minor one
        #[arg(long)]
        major: bool,

        /// What changed in this version
        #[arg(long, short)]
        changelog: Option<String>,

        /// CSV replacing the dataset's file; publishes a new DOI when linked
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List every version of a dataset's concept
    List {
        /// Dataset ID
        dataset: DatasetId,
    },
}

pub fn run(cmd: VersionCommands, output: &Output) -> Result<()> {
    match cmd {
        VersionCommands::New {
            dataset,
            major,
            changelog,
            file,
        } => new_version(
            output,
            dataset,
            NewVersionRequest {
                bump_major: major,
                changelog,
                replacement: file,
            },
        ),
        VersionCommands::List { dataset } => list_versions(output, dataset),
    }
}

fn new_version(output: &Output, dataset_id: DatasetId, request: NewVersionRequest) -> Result<()> {
    let session = Session::open()?;
    let service = session.service()?;

    let outcome = service
        .orchestrator()
        .create_new_version(dataset_id, request)?;

    for skipped in &outcome.files_skipped {
        output.warn(&format!(
            "file {} was not copied: {}",
            skipped.name, skipped.reason
        ));
    }

    if output.is_json() {
        let (registry, registry_error) = match &outcome.registry {
            Ok(update) => (serde_json::to_value(update)?, None),
            Err(e) => (serde_json::Value::Null, Some(e.to_string())),
        };
        output.data(&serde_json::json!({
            "dataset_id": outcome.dataset.id,
            "version": outcome.version.label(),
            "concept_id": outcome.version.concept_id,
            "changelog": outcome.version.changelog,
            "files_skipped": outcome.files_skipped,
            "registry": registry,
            "registry_error": registry_error,
        }));
    } else {
        output.success(&format!(
            "Created version {} as dataset {}",
            outcome.version.label(),
            outcome.dataset.id
        ));
        match &outcome.registry {
            Ok(RegistryUpdate::NotLinked) => {}
            Ok(RegistryUpdate::LabelUpdated { deposition_id }) => {
                println!("Deposition {} labelled {}", deposition_id, outcome.version.label());
            }
            Ok(RegistryUpdate::Published { deposition_id, doi }) => {
                println!("Deposition {} published as {}", deposition_id, doi);
            }
            Err(_) => {}
        }
    }

    // The version exists; the registry failure still fails the command
    if let Err(e) = outcome.registry {
        return Err(anyhow::Error::new(e).context(format!(
            "Version {} was created but the registry was not updated",
            outcome.version.label()
        )));
    }

    Ok(())
}

fn list_versions(output: &Output, dataset_id: DatasetId) -> Result<()> {
    let session = Session::open()?;
    let service = session.service()?;
    let versions = service.get_dataset_versions(dataset_id)?;

    if output.is_json() {
        let items: Vec<_> = versions.iter().map(version_json).collect();
        output.data(&items);
    } else if versions.is_empty() {
        println!("Dataset {} is not versioned.", dataset_id);
    } else {
        println!("{:<8} {:<8} {:<17} CHANGELOG", "VERSION", "DATASET", "RELEASED");
        println!("{}", "-".repeat(60));
        for version in &versions {
            let marker = if version.dataset_id == dataset_id { "*" } else { " " };
            println!(
                "{:<8} {:<8} {:<17} {}",
                format!("{}{}", version.label(), marker),
                version.dataset_id,
                version.release_date.format("%Y-%m-%d %H:%M"),
                version.changelog.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}

fn version_json(version: &Version) -> serde_json::Value {
    serde_json::json!({
        "version": version.label(),
        "major": version.number.major,
        "minor": version.number.minor,
        "dataset_id": version.dataset_id,
        "concept_id": version.concept_id,
        "release_date": version.release_date,
        "changelog": version.changelog,
    })
}
