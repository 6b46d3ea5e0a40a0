// Based on code from here: https://github.com/claudiomattera/esp32c3-embassy/

//! Functions for setting up the logging system

use core::fmt;
use core::str::FromStr;

use esp_hal::time::now;
use esp_println::println;
use log::Level;
use log::LevelFilter;
use log::Log;
use log::Metadata;
use log::Record;
use thiserror::Error;

/// Log level from environment
const LEVEL: Option<&'static str> = option_env!("ESP_LOG");

static LOGGER: ConsoleLogger = ConsoleLogger {};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to set the global logger. No logs will be provided.")]
    FailedToSetLogger,
}

/// Writes log records to the serial console, prefixed with the time since boot
pub struct ConsoleLogger {}

impl ConsoleLogger {
    fn max_level() -> LevelFilter {
        LEVEL
            .map(|level| LevelFilter::from_str(level).unwrap_or(LevelFilter::Info))
            .unwrap_or(LevelFilter::Info)
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Self::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            log_to_console(record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

fn log_to_console(level: Level, target: &str, args: &fmt::Arguments) {
    /// Modifier for restoring normal text style
    const RESET: &str = "\u{001B}[0m";
    /// Modifier for setting gray text
    const GRAY: &str = "\u{001B}[2m";
    /// Modifier for setting red text
    const RED: &str = "\u{001B}[31m";
    /// Modifier for setting green text
    const GREEN: &str = "\u{001B}[32m";
    /// Modifier for setting yellow text
    const YELLOW: &str = "\u{001B}[33m";
    /// Modifier for setting blue text
    const BLUE: &str = "\u{001B}[34m";
    /// Modifier for setting cyan text
    const CYAN: &str = "\u{001B}[35m";

    let color = match level {
        Level::Error => RED,
        Level::Warn => YELLOW,
        Level::Info => GREEN,
        Level::Debug => BLUE,
        Level::Trace => CYAN,
    };

    let millis = now().ticks() / 1_000;
    println!(
        "{}{:>8}{} {}{:>5}{} {}{}]{} {}",
        GRAY, millis, RESET, color, level, RESET, GRAY, target, RESET, args
    );
}

/// Setup logging
///
/// To change the log level change the `env` section in `.cargo/config.toml`
/// or remove it and set the environment variable `ESP_LOG` manually before
/// running `cargo run`.
///
/// This requires a clean rebuild because of
/// <https://github.com/rust-lang/cargo/issues/10358>
pub fn setup() -> Result<(), Error> {
    log::set_logger(&LOGGER).map_err(|_| Error::FailedToSetLogger)?;
    log::set_max_level(ConsoleLogger::max_level());

    log_to_console(
        Level::Debug,
        "temperature_node_embedded::logging::setup()",
        &format_args!("Logger is ready"),
    );
    Ok(())
}
