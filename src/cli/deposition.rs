//! Registry CLI commands: publishing datasets and inspecting depositions

use anyhow::{Context, Result};
use clap::Subcommand;

use super::dataset::dataset_json;
use super::output::Output;
use super::session::Session;
use crate::domain::{DatasetId, Deposition, DepositionId, Doi};

#[derive(Subcommand)]
pub enum DepositionCommands {
    /// List depositions in the registry
    List,

    /// Show a deposition and its metadata bag
    Show {
        /// Deposition ID
        id: DepositionId,
    },

    /// Show a deposition's version history
    Versions {
        /// Deposition ID
        id: DepositionId,
    },

    /// Delete a deposition and its uploaded files
    Delete {
        /// Deposition ID
        id: DepositionId,
    },
}

pub fn run(cmd: DepositionCommands, output: &Output) -> Result<()> {
    let session = Session::open()?;

    match cmd {
        DepositionCommands::List => list(&session, output),
        DepositionCommands::Show { id } => show(&session, output, id),
        DepositionCommands::Versions { id } => versions(&session, output, id),
        DepositionCommands::Delete { id } => delete(&session, output, id),
    }
}

/// Uploads a dataset's files, publishes it and records its DOI
pub fn publish(output: &Output, dataset_id: DatasetId) -> Result<()> {
    let session = Session::open()?;
    let service = session.service()?;

    let receipt = service
        .orchestrator()
        .sync_dataset(dataset_id)
        .with_context(|| format!("Failed to publish dataset {}", dataset_id))?;

    if output.is_json() {
        output.data(&receipt);
    } else {
        output.success(&format!(
            "Published dataset {} as {} (deposition {})",
            receipt.dataset_id, receipt.doi, receipt.deposition_id
        ));
    }

    Ok(())
}

/// Creates the draft deposition of a dataset without publishing it
pub fn prepare(output: &Output, dataset_id: DatasetId) -> Result<()> {
    let session = Session::open()?;
    let service = session.service()?;

    let deposition_id = service
        .orchestrator()
        .prepare_deposition(dataset_id)
        .with_context(|| format!("Failed to prepare dataset {}", dataset_id))?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "dataset_id": dataset_id,
            "deposition_id": deposition_id,
        }));
    } else {
        output.success(&format!(
            "Dataset {} linked to draft deposition {}",
            dataset_id, deposition_id
        ));
    }

    Ok(())
}

/// Shows what a DOI points to, including DOIs a later publish superseded
pub fn resolve(output: &Output, doi: &Doi) -> Result<()> {
    let session = Session::open()?;
    let service = session.service()?;
    let resolution = service.orchestrator().resolve_doi(doi)?;

    if output.is_json() {
        output.data(&serde_json::json!({
            "doi": resolution.doi,
            "superseded": resolution.superseded,
            "dataset": resolution.dataset.as_ref().map(dataset_json),
            "deposition": resolution.deposition,
        }));
        return Ok(());
    }

    println!("DOI: {}", resolution.doi);
    match &resolution.dataset {
        Some(dataset) => println!(
            "Dataset: {} ({}) version {}",
            dataset.id,
            dataset.metadata.title,
            dataset.version_label().unwrap_or_else(|| "-".to_string())
        ),
        None => println!("Dataset: -"),
    }
    match &resolution.deposition {
        Some(dep) => {
            println!("Deposition: {} ({})", dep.id, status_label(dep));
            if resolution.superseded {
                if let Some(current) = &dep.doi {
                    println!("Superseded by: {}", current);
                }
            }
        }
        None => println!("Deposition: -"),
    }

    Ok(())
}

fn list(session: &Session, output: &Output) -> Result<()> {
    let depositions = session.registry().store().list()?;

    if output.is_json() {
        output.data(&depositions);
    } else if depositions.is_empty() {
        println!("No depositions found.");
    } else {
        println!("{:<6} {:<10} {:<8} {:<26} TITLE", "ID", "STATUS", "VERSION", "DOI");
        println!("{}", "-".repeat(80));
        for dep in &depositions {
            println!(
                "{:<6} {:<10} {:<8} {:<26} {}",
                dep.id,
                status_label(dep),
                dep.metadata.dataset_version.as_deref().unwrap_or("-"),
                dep.doi.as_ref().map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                dep.metadata.title.as_deref().unwrap_or("")
            );
        }
    }

    Ok(())
}

fn show(session: &Session, output: &Output, id: DepositionId) -> Result<()> {
    let dep = session
        .registry()
        .store()
        .get(id)?
        .ok_or_else(|| anyhow::anyhow!("Deposition not found: {}", id))?;

    if output.is_json() {
        output.data(&dep);
        return Ok(());
    }

    println!("Deposition: {}", dep.id);
    println!("Status: {}", status_label(&dep));
    if let Some(doi) = &dep.doi {
        println!("DOI: {}", doi);
    }
    if let Some(title) = &dep.metadata.title {
        println!("Title: {}", title);
    }
    if let Some(label) = &dep.metadata.dataset_version {
        println!("Version: {}", label);
    }
    if let Some(dataset_id) = dep.metadata.dataset_id {
        println!("Dataset: {}", dataset_id);
    }
    println!("Created: {}", dep.created_at.format("%Y-%m-%d %H:%M"));
    println!("Updated: {}", dep.updated_at.format("%Y-%m-%d %H:%M"));

    if !dep.metadata.files.is_empty() {
        println!("\nFiles ({}):", dep.metadata.files.len());
        for file in &dep.metadata.files {
            println!("  {:<30} {}", file.file_name, file.file_type);
        }
    }

    if !dep.metadata.extra.is_empty() {
        println!("\nOther metadata:");
        for (key, value) in &dep.metadata.extra {
            println!("  {}: {}", key, value);
        }
    }

    Ok(())
}

fn versions(session: &Session, output: &Output, id: DepositionId) -> Result<()> {
    let history = session
        .registry()
        .store()
        .version_history(id)
        .with_context(|| format!("Failed to read history of deposition {}", id))?;

    if output.is_json() {
        output.data(&history);
    } else if history.is_empty() {
        println!("Deposition {} has no published versions.", id);
    } else {
        println!("{:<8} {:<26} {:<17} NOTE", "VERSION", "DOI", "DATE");
        println!("{}", "-".repeat(72));
        for entry in &history {
            println!(
                "{:<8} {:<26} {:<17} {}",
                entry.version,
                entry.doi.as_ref().map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                entry.created_at.format("%Y-%m-%d %H:%M"),
                entry
                    .changes
                    .as_ref()
                    .and_then(|c| c.comment.as_deref())
                    .unwrap_or("")
            );
        }
    }

    Ok(())
}

fn delete(session: &Session, output: &Output, id: DepositionId) -> Result<()> {
    if !session.registry().delete_deposition(id)? {
        anyhow::bail!("Deposition not found: {}", id);
    }

    if output.is_json() {
        output.data(&serde_json::json!({
            "id": id,
            "deleted": true,
        }));
    } else {
        output.success(&format!("Deleted deposition {}", id));
    }

    Ok(())
}

fn status_label(dep: &Deposition) -> String {
    if dep.dirty {
        format!("{}*", dep.status)
    } else {
        dep.status.to_string()
    }
}
