use std::fs::OpenOptions;

use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode, WriteLogger};

use crate::config::Config;

/// Parse a level name; unknown names fall back to `warn`.
pub fn parse_level(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Warn)
}

/// Install the global logger. `MINISH_LOG` overrides the configured level.
///
/// Best-effort: if the log file cannot be opened, records go to stderr.
pub fn init(config: &Config) {
    let level = std::env::var("MINISH_LOG")
        .map(|name| parse_level(&name))
        .unwrap_or_else(|_| parse_level(&config.log_level));

    let log_config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();

    if let Some(path) = &config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let _ = WriteLogger::init(level, log_config, file);
                return;
            }
            Err(err) => eprintln!("minish: log file {}: {err}", path.display()),
        }
    }

    let _ = TermLogger::init(level, log_config, TerminalMode::Stderr, ColorChoice::Never);
}
