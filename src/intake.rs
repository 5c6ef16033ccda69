use std::fs;
use std::path::Path;

use log::{debug, error, warn};

use crate::error::SqlDropError;
use crate::unit::{Unit, UnitLocation};

const UNIT_EXTENSION: &str = ".sql";

pub struct Intake;

impl Intake {
    /// Whether a file name follows the unit naming convention (`*.sql`, not hidden)
    pub fn is_unit_name(name: &str) -> bool {
        name.len() > UNIT_EXTENSION.len()
            && name.ends_with(UNIT_EXTENSION)
            && !name.starts_with('.')
    }

    /// Units currently present in `dir`, sorted by identity.
    ///
    /// A missing or unreadable directory is reported and yields no units; it
    /// never stops the caller.
    pub fn enumerate(dir: &Path) -> Vec<Unit> {
        match Self::list(dir) {
            Ok(units) => units,
            Err(e) => {
                error!("Cannot enumerate intake directory {}: {}", dir.display(), e);
                Vec::new()
            }
        }
    }

    /// Like `enumerate`, but surfaces directory errors to the caller
    pub fn list(dir: &Path) -> Result<Vec<Unit>, SqlDropError> {
        Self::list_in(dir, UnitLocation::Intake)
    }

    /// Units in any directory that holds them; `location` names the directory
    /// in diagnostics
    pub fn list_in(dir: &Path, location: UnitLocation) -> Result<Vec<Unit>, SqlDropError> {
        if !dir.is_dir() {
            return Err(SqlDropError::Error(format!(
                "'{}' does not exist or is not a directory",
                dir.display()
            )));
        }

        let mut units = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!("Ignoring entry with non UTF-8 name: {}", path.display());
                continue;
            };
            debug!("{} entry: {}", location, name);

            if !Self::is_unit_name(&name) {
                continue;
            }

            // Follows symlinks so a linked unit is treated like a regular file
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => units.push(Unit::new(name, path)),
                Ok(_) => debug!("Ignoring non-file entry: {}", name),
                Err(e) => warn!("Cannot stat {} entry {}: {}", location, name, e),
            }
        }

        units.sort_by(|a, b| a.identity().cmp(b.identity()));

        Ok(units)
    }
}
