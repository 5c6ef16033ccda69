use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local};
use log::{error, info, warn};
use serde::Serialize;

use crate::error::SqlDropError;
use crate::intake::Intake;
use crate::unit::{Unit, UnitLocation};

const RECORD_EXTENSION: &str = "log";

/// Advisory audit artifact written next to an archived unit. The archived unit
/// itself is the proof of application; a missing record only means the process
/// stopped between the rename and the write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompletionRecord {
    pub unit_identity: String,
    pub processed_at: DateTime<FixedOffset>,
    pub payload_sha256: Option<String>,
}

impl CompletionRecord {
    pub fn new(unit_identity: &str, payload_sha256: Option<String>) -> Self {
        Self {
            unit_identity: unit_identity.to_owned(),
            processed_at: Local::now().fixed_offset(),
            payload_sha256,
        }
    }

    pub fn render(&self) -> String {
        let mut text = format!(
            "Processed: {}\nFile: {}\n",
            self.processed_at.to_rfc3339(),
            self.unit_identity
        );
        if let Some(digest) = &self.payload_sha256 {
            text.push_str(&format!("SHA-256: {}\n", digest));
        }
        text
    }

    pub fn parse(text: &str) -> Result<Self, SqlDropError> {
        let mut processed_at = None;
        let mut unit_identity = None;
        let mut payload_sha256 = None;

        for line in text.lines() {
            if let Some(value) = line.strip_prefix("Processed: ") {
                let parsed = DateTime::parse_from_rfc3339(value.trim()).map_err(|e| {
                    SqlDropError::Error(format!("Invalid processed timestamp '{}': {}", value, e))
                })?;
                processed_at = Some(parsed);
            } else if let Some(value) = line.strip_prefix("File: ") {
                unit_identity = Some(value.trim().to_owned());
            } else if let Some(value) = line.strip_prefix("SHA-256: ") {
                payload_sha256 = Some(value.trim().to_owned());
            }
        }

        match (unit_identity, processed_at) {
            (Some(unit_identity), Some(processed_at)) => Ok(Self {
                unit_identity,
                processed_at,
                payload_sha256,
            }),
            _ => Err(SqlDropError::Error(
                "Completion record is missing 'Processed' or 'File'".into(),
            )),
        }
    }
}

/// Result of moving a unit into the archive
#[derive(Debug)]
pub struct ArchiveReceipt {
    pub archived_path: PathBuf,
    pub record_path: PathBuf,
    pub record_written: bool,
}

/// An archived unit as seen on disk
#[derive(Debug, Serialize)]
pub struct ArchivedEntry {
    pub identity: String,
    pub record: Option<CompletionRecord>,
}

/// The archive directory: terminal location of successfully applied units
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the archive directory if it does not exist yet
    pub fn ensure_exists(&self) -> Result<(), SqlDropError> {
        if !self.dir.is_dir() {
            fs::create_dir_all(&self.dir)?;
            info!("Created archive directory {}", self.dir.display());
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.dir.is_dir()
    }

    /// Units move by rename, which cannot cross filesystems. Warn when the
    /// intake and archive directories are on different devices.
    #[cfg(unix)]
    pub fn warn_if_cross_device(&self, intake_dir: &Path) {
        use std::os::unix::fs::MetadataExt;

        if let (Ok(intake), Ok(archive)) = (fs::metadata(intake_dir), fs::metadata(&self.dir)) {
            if intake.dev() != archive.dev() {
                warn!(
                    "Intake {} and archive {} are on different filesystems; units cannot be renamed into the archive",
                    intake_dir.display(),
                    self.dir.display()
                );
            }
        }
    }

    #[cfg(not(unix))]
    pub fn warn_if_cross_device(&self, _intake_dir: &Path) {}

    pub fn contains(&self, identity: &str) -> bool {
        fs::symlink_metadata(self.dir.join(identity)).is_ok()
    }

    pub fn record_path(&self, unit: &Unit) -> PathBuf {
        self.dir
            .join(format!("{}.{}", unit.base_name(), RECORD_EXTENSION))
    }

    /// Move an applied unit from intake into the archive with a single rename,
    /// then write its completion record.
    ///
    /// Only the rename can fail this call. A failed record write is logged and
    /// reported in the receipt; the unit stays archived either way. An
    /// existing archived unit with the same identity is never overwritten.
    pub fn archive_unit(
        &self,
        unit: &Unit,
        payload_sha256: Option<String>,
    ) -> Result<ArchiveReceipt, SqlDropError> {
        let archived_path = self.dir.join(unit.identity());

        if self.contains(unit.identity()) {
            return Err(SqlDropError::Error(format!(
                "'{}' already exists in the archive",
                unit.identity()
            )));
        }

        fs::rename(unit.path(), &archived_path)?;

        let record_path = self.record_path(unit);
        let record = CompletionRecord::new(unit.identity(), payload_sha256);

        let record_written = match fs::write(&record_path, record.render()) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Archived {} but could not write completion record {}: {}",
                    unit.identity(),
                    record_path.display(),
                    e
                );
                false
            }
        };

        Ok(ArchiveReceipt {
            archived_path,
            record_path,
            record_written,
        })
    }

    /// All archived units with their completion records, sorted by identity
    pub fn list(&self) -> Result<Vec<ArchivedEntry>, SqlDropError> {
        Intake::list_in(&self.dir, UnitLocation::Archived)?
            .into_iter()
            .map(|unit| {
                let record_path = self.record_path(&unit);
                let record = if record_path.exists() {
                    match fs::read_to_string(&record_path)
                        .map_err(SqlDropError::from)
                        .and_then(|text| CompletionRecord::parse(&text))
                    {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!("Unreadable completion record {}: {}", record_path.display(), e);
                            None
                        }
                    }
                } else {
                    None
                };

                Ok(ArchivedEntry {
                    identity: unit.identity().to_owned(),
                    record,
                })
            })
            .collect()
    }

    /// Report archived units lacking a completion record. These are treated as
    /// applied; the warning is for the audit trail only.
    pub fn audit(&self) -> Result<Vec<String>, SqlDropError> {
        let missing: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|entry| entry.record.is_none())
            .map(|entry| entry.identity)
            .collect();

        for identity in &missing {
            warn!(
                "Archived unit {} has no completion record (treated as applied)",
                identity
            );
        }

        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_log;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use tempfile::{tempdir, TempDir};

    struct Dirs {
        _root: TempDir,
        intake: PathBuf,
        archive: Archive,
    }

    fn setup() -> Dirs {
        let root = tempdir().unwrap();
        let intake = root.path().join("intake");
        let archive_dir = root.path().join("archive");
        fs::create_dir(&intake).unwrap();
        fs::create_dir(&archive_dir).unwrap();
        Dirs {
            archive: Archive::new(archive_dir),
            intake,
            _root: root,
        }
    }

    fn drop_unit(intake: &Path, name: &str, sql: &str) -> Unit {
        let path = intake.join(name);
        fs::write(&path, sql).unwrap();
        Unit::new(name, path)
    }

    #[test]
    fn test_archive_unit_moves_file_and_writes_record() {
        let dirs = setup();
        let unit = drop_unit(&dirs.intake, "batch-2024-05-01.sql", "INSERT INTO t VALUES (1);");

        let receipt = dirs
            .archive
            .archive_unit(&unit, Some("abc123".into()))
            .unwrap();

        assert!(!unit.path().exists());
        assert!(receipt.archived_path.exists());
        assert!(receipt.record_written);
        assert_eq!(
            receipt.record_path,
            dirs.archive.dir().join("batch-2024-05-01.log")
        );
        assert_eq!(
            fs::read_to_string(&receipt.archived_path).unwrap(),
            "INSERT INTO t VALUES (1);"
        );

        let record =
            CompletionRecord::parse(&fs::read_to_string(&receipt.record_path).unwrap()).unwrap();
        assert_eq!(record.unit_identity, "batch-2024-05-01.sql");
        assert_eq!(record.payload_sha256.as_deref(), Some("abc123"));
        assert_eq!(
            record.processed_at.date_naive(),
            Local::now().fixed_offset().date_naive()
        );
    }

    #[test]
    fn test_archive_unit_refuses_to_overwrite() {
        let dirs = setup();
        fs::write(dirs.archive.dir().join("dup.sql"), "old").unwrap();
        let unit = drop_unit(&dirs.intake, "dup.sql", "new");

        assert!(dirs.archive.archive_unit(&unit, None).is_err());
        assert_eq!(fs::read_to_string(unit.path()).unwrap(), "new");
        assert_eq!(
            fs::read_to_string(dirs.archive.dir().join("dup.sql")).unwrap(),
            "old"
        );
    }

    #[test]
    fn test_archive_unit_rename_failure_leaves_unit_in_intake() {
        let dirs = setup();
        let unit = drop_unit(&dirs.intake, "a.sql", "SELECT 1;");
        fs::remove_dir(dirs.archive.dir()).unwrap();

        assert!(dirs.archive.archive_unit(&unit, None).is_err());
        assert!(unit.path().exists());
    }

    #[test]
    fn test_record_write_failure_keeps_unit_archived() {
        let dirs = setup();
        let unit = drop_unit(&dirs.intake, "a.sql", "SELECT 1;");
        // A directory squatting on the record path makes the write fail
        fs::create_dir(dirs.archive.dir().join("a.log")).unwrap();

        let receipt = dirs.archive.archive_unit(&unit, None).unwrap();
        assert!(!receipt.record_written);
        assert!(receipt.archived_path.exists());
        assert!(!unit.path().exists());
    }

    #[test]
    fn test_audit_reports_units_without_record() {
        let dirs = setup();
        let unit = drop_unit(&dirs.intake, "a.sql", "SELECT 1;");
        dirs.archive.archive_unit(&unit, None).unwrap();
        fs::write(dirs.archive.dir().join("b.sql"), "SELECT 2;").unwrap();

        assert_eq!(dirs.archive.audit().unwrap(), vec!["b.sql".to_string()]);
    }

    #[test]
    fn test_list_includes_records() {
        let dirs = setup();
        let unit = drop_unit(&dirs.intake, "a.sql", "SELECT 1;");
        dirs.archive.archive_unit(&unit, Some("d1".into())).unwrap();

        let entries = dirs.archive.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity, "a.sql");
        let record = entries[0].record.as_ref().unwrap();
        assert_eq!(record.payload_sha256.as_deref(), Some("d1"));
    }

    #[test]
    #[serial]
    fn test_list_diagnostics_name_the_archive() {
        let dirs = setup();
        let unit = drop_unit(&dirs.intake, "a.sql", "SELECT 1;");
        dirs.archive.archive_unit(&unit, None).unwrap();

        test_log::start();
        dirs.archive.list().unwrap();
        let lines: Vec<String> = test_log::take().into_iter().map(|(_, line)| line).collect();

        assert!(lines.contains(&"Archived entry: a.sql".to_string()), "{lines:?}");
        assert!(!lines.iter().any(|line| line.starts_with("Intake")), "{lines:?}");
    }

    #[test]
    fn test_ensure_exists_creates_directory() {
        let root = tempdir().unwrap();
        let archive = Archive::new(root.path().join("a").join("b"));
        assert!(!archive.is_ready());

        archive.ensure_exists().unwrap();
        assert!(archive.is_ready());
    }

    #[test]
    fn test_record_parse_rejects_incomplete_text() {
        assert!(CompletionRecord::parse("File: a.sql\n").is_err());
        assert!(CompletionRecord::parse("Processed: yesterday\nFile: a.sql\n").is_err());
    }

    #[test]
    fn test_record_render_parse() {
        let record = CompletionRecord::new("x.sql", None);
        let text = record.render();
        assert!(text.starts_with("Processed: "));
        assert!(text.contains("File: x.sql\n"));
        assert!(!text.contains("SHA-256"));
        assert_eq!(CompletionRecord::parse(&text).unwrap(), record);
    }
}
