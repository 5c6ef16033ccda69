use flexi_logger::FlexiLoggerError;
use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlDropError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error), // Converts io::Error into SqlDropError automatically

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError), // Converts rusqlite::Error automatically

    #[error("Configuration error: {0}")]
    ConfigError(#[from] Box<figment::Error>),

    #[error("Logger error: {0}")]
    LoggerError(#[from] FlexiLoggerError),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Database unavailable after {attempts} connection attempt(s)")]
    DatabaseUnavailable { attempts: u32 },

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl From<figment::Error> for SqlDropError {
    fn from(err: figment::Error) -> Self {
        SqlDropError::ConfigError(Box::new(err))
    }
}
