use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display};

use crate::error::SqlDropError;

/// Where a unit currently lives. A unit is in exactly one location at rest;
/// moving between them is a single rename.
#[derive(AsRefStr, Display, Debug, Serialize, PartialEq, Eq, Copy, Clone)]
pub enum UnitLocation {
    Intake,
    Archived,
}

/// One SQL batch file. The file name is the unit's identity and correlates the
/// pending file, its archived form and its completion record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    identity: String,
    path: PathBuf,
}

impl Unit {
    pub fn new(identity: impl Into<String>, path: PathBuf) -> Self {
        Self {
            identity: identity.into(),
            path,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full SQL payload. The content is opaque to sqldrop.
    pub fn read_payload(&self) -> Result<String, SqlDropError> {
        Ok(fs::read_to_string(&self.path)?)
    }

    /// Lowercase hex SHA-256 of a payload, recorded alongside the archived unit
    pub fn payload_digest(payload: &str) -> String {
        hex::encode(Sha256::digest(payload.as_bytes()))
    }

    /// Identity with the `.sql` extension removed
    pub fn base_name(&self) -> &str {
        Path::new(&self.identity)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.identity)
    }
}
