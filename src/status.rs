use std::fmt::Write;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::archive::{Archive, ArchivedEntry};
use crate::config::Config;
use crate::error::SqlDropError;
use crate::intake::Intake;
use crate::unit::UnitLocation;

#[derive(Debug, Serialize)]
pub struct PendingEntry {
    pub identity: String,
    pub size_bytes: Option<u64>,
}

/// Read-only snapshot of both directories. Never touches the database.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub intake_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub pending: Vec<PendingEntry>,
    pub archived: Vec<ArchivedEntry>,
    pub errors: Vec<String>,
}

impl StatusReport {
    pub fn collect(config: &Config) -> Self {
        let mut errors = Vec::new();

        let pending = match Intake::list(&config.paths.intake_dir) {
            Ok(units) => units
                .into_iter()
                .map(|unit| PendingEntry {
                    size_bytes: fs::metadata(unit.path()).ok().map(|m| m.len()),
                    identity: unit.identity().to_owned(),
                })
                .collect(),
            Err(e) => {
                errors.push(format!("{}: {}", UnitLocation::Intake, e));
                Vec::new()
            }
        };

        let archived = match Archive::new(&config.paths.archive_dir).list() {
            Ok(entries) => entries,
            Err(e) => {
                errors.push(format!("{}: {}", UnitLocation::Archived, e));
                Vec::new()
            }
        };

        StatusReport {
            intake_dir: config.paths.intake_dir.clone(),
            archive_dir: config.paths.archive_dir.clone(),
            pending,
            archived,
            errors,
        }
    }

    pub fn to_json(&self) -> Result<String, SqlDropError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SqlDropError::Error(format!("Failed to serialize status: {}", e)))
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "Intake:  {}", self.intake_dir.display());
        let _ = writeln!(out, "Archive: {}", self.archive_dir.display());

        for error in &self.errors {
            let _ = writeln!(out, "  ! {}", error);
        }

        let _ = writeln!(out, "\nPending ({}):", self.pending.len());
        for entry in &self.pending {
            let size = entry
                .size_bytes
                .map(|s| format!("{} bytes", s))
                .unwrap_or_else(|| "-".into());
            let _ = writeln!(out, "  {:<40} {}", entry.identity, size);
        }

        let _ = writeln!(out, "\nArchived ({}):", self.archived.len());
        for entry in &self.archived {
            let processed = entry
                .record
                .as_ref()
                .map(|r| r.processed_at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "(no completion record)".into());
            let _ = writeln!(out, "  {:<40} {}", entry.identity, processed);
        }

        out
    }
}
