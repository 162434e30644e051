//! On-disk state: dated lead artifacts and the sent ledger.
//!
//! Both files are JSON and rewritten whole. Writes go to a temp file in the
//! target directory and are renamed into place, so readers never see a
//! truncated file.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::Lead;

pub const ARTIFACT_PREFIX: &str = "leads_";
pub const ARTIFACT_SUFFIX: &str = ".json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(io_err(&dir))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(&json).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(io_err(path))
}

// ============================================================================
// Lead artifacts
// ============================================================================

pub fn artifact_file_name(date: NaiveDate) -> String {
    format!("{ARTIFACT_PREFIX}{}{ARTIFACT_SUFFIX}", date.format("%Y%m%d"))
}

/// Write `leads` to `<dir>/leads_YYYYMMDD.json`, replacing a same-day file.
pub fn write_artifact(dir: &Path, date: NaiveDate, leads: &[Lead]) -> Result<PathBuf, StoreError> {
    let path = dir.join(artifact_file_name(date));
    write_json_atomic(&path, leads)?;
    Ok(path)
}

pub fn read_artifact(path: &Path) -> Result<Vec<Lead>, StoreError> {
    let contents = fs::read_to_string(path).map_err(io_err(path))?;
    serde_json::from_str(&contents).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// The newest artifact in `dir` by file name. A missing directory has none.
pub fn latest_artifact(dir: &Path) -> Result<Option<PathBuf>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(dir)(e)),
    };

    let mut newest: Option<(String, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(io_err(dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(ARTIFACT_PREFIX) || !name.ends_with(ARTIFACT_SUFFIX) {
            continue;
        }
        if !entry.path().is_file() {
            continue;
        }
        if newest.as_ref().map_or(true, |(best, _)| name > *best) {
            newest = Some((name, entry.path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

// ============================================================================
// Sent ledger
// ============================================================================

/// Ids of leads already delivered to the report sinks. Only ever grows.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl Ledger {
    /// Load the ledger at `path`. A missing, unreadable or malformed file is an
    /// empty ledger.
    pub fn load(path: &Path) -> Self {
        let ids = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Vec<String>>(&contents) {
                Ok(ids) => ids.into_iter().collect(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Sent ledger is malformed, starting empty");
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Sent ledger unreadable, starting empty");
                BTreeSet::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            ids,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    /// Add ids, returning how many were not already present.
    pub fn record<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for id in ids {
            if self.ids.insert(id.into()) {
                added += 1;
            }
        }
        added
    }

    pub fn save(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &self.ids)
    }
}
