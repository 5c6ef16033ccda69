use flexi_logger::{opt_format, Logger, LoggerHandle};

use crate::config::LoggingConfig;
use crate::error::SqlDropError;

pub struct Logging;

impl Logging {
    /// Start the process-wide logger. Everything goes to stdout so a container
    /// runtime or service manager can collect it. The returned handle must be
    /// kept alive for as long as the process logs.
    pub fn init(logging: &LoggingConfig) -> Result<LoggerHandle, SqlDropError> {
        let handle = Self::logger(logging)?.start()?;

        Ok(handle)
    }

    fn logger(logging: &LoggingConfig) -> Result<Logger, SqlDropError> {
        Ok(Logger::try_with_str(logging.log_spec())?
            .log_to_stdout()
            .format(opt_format))
    }
}
