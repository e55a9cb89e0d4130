//! Physical file layout
//!
//! Dataset files live under `{root}/user_{owner}/dataset_{id}/`. Each dataset
//! owns its directory exclusively.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::{DatasetId, OwnerId};

/// Checksum and byte size of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub checksum: String,
    pub size: u64,
}

/// Root of the uploaded-files tree
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one dataset's files
    pub fn dataset_dir(&self, owner: OwnerId, dataset: DatasetId) -> PathBuf {
        self.root
            .join(format!("user_{}", owner))
            .join(format!("dataset_{}", dataset))
    }

    /// Path of a named file within a dataset's directory
    pub fn file_path(&self, owner: OwnerId, dataset: DatasetId, name: &str) -> PathBuf {
        self.dataset_dir(owner, dataset).join(name)
    }

    /// Copies `source` into the dataset's directory under `name`
    ///
    /// Intermediate directories are created as needed.
    pub fn copy_into(
        &self,
        source: &Path,
        owner: OwnerId,
        dataset: DatasetId,
        name: &str,
    ) -> io::Result<PathBuf> {
        let dir = self.dataset_dir(owner, dataset);
        fs::create_dir_all(&dir)?;

        let dest = dir.join(name);
        fs::copy(source, &dest)?;
        debug!(from = %source.display(), to = %dest.display(), "copied file");

        Ok(dest)
    }

    /// Removes one named file from a dataset's directory
    ///
    /// Returns false if the file was not there.
    pub fn remove_file(&self, owner: OwnerId, dataset: DatasetId, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.file_path(owner, dataset, name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Writes every file of a dataset's directory into a zip archive at `dest`
    ///
    /// Entries are stored flat and sorted by name. Returns the entry count. A
    /// partially written archive is removed.
    pub fn package(&self, owner: OwnerId, dataset: DatasetId, dest: &Path) -> io::Result<usize> {
        let dir = self.dataset_dir(owner, dataset);
        let mut paths = fs::read_dir(&dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        paths.retain(|p| p.is_file());
        paths.sort();

        let written = write_archive(&paths, dest);
        if written.is_err() {
            let _ = fs::remove_file(dest);
        }
        let count = written?;

        debug!(dir = %dir.display(), archive = %dest.display(), files = count, "packaged dataset");
        Ok(count)
    }

    /// Removes a dataset's directory and everything in it
    pub fn remove_dataset_dir(&self, owner: OwnerId, dataset: DatasetId) -> io::Result<()> {
        let dir = self.dataset_dir(owner, dataset);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn write_archive(paths: &[PathBuf], dest: &Path) -> io::Result<usize> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut archive = ZipWriter::new(fs::File::create(dest)?);

    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non UTF-8 file name: {}", path.display()),
                )
            })?;
        archive.start_file(name, options).map_err(io::Error::other)?;
        io::copy(&mut fs::File::open(path)?, &mut archive)?;
    }

    archive.finish().map_err(io::Error::other)?;
    Ok(paths.len())
}

/// Computes the blake3 checksum and size of a file
pub fn digest_file(path: &Path) -> io::Result<FileDigest> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 16 * 1024];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(FileDigest {
        checksum: hasher.finalize().to_hex().to_string(),
        size,
    })
}
