mod archive;
mod cli;
mod config;
mod error;
mod executor;
mod intake;
mod logging;
mod processor;
mod scheduler;
mod status;
#[cfg(test)]
mod test_log;
mod unit;
mod watcher;

use cli::Cli;
use log::error;

fn main() {
    // Logging is configured from the loaded config inside the command handler.
    // Errors before that point only reach stderr.
    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
