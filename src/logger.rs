//! Minimal stdout/stderr logger.
//!
//! Progress for the operator is drawn by [`crate::ui`]; the log carries the
//! detail underneath it (command lines, ignored failures).

use console::style;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

pub struct Logger {
    pub level: LevelFilter,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match record.level() {
            Level::Error => eprintln!("  {} {}", style("error:").red().bold(), record.args()),
            Level::Warn => eprintln!("  {} {}", style("warning:").yellow(), record.args()),
            Level::Info => println!("  {}", style(record.args()).dim()),
            Level::Debug | Level::Trace => {
                println!("  {}", style(format!("[{}] {}", record.target(), record.args())).dim())
            }
        }
    }

    fn flush(&self) {}
}

/// Set up logging.
pub fn init(debug: bool) -> Result<(), SetLoggerError> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let logger = Logger { level };
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))
}
