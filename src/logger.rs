use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

struct DynLogger {
    level: AtomicUsize,
}

impl DynLogger {
    const fn new() -> Self {
        Self {
            level: AtomicUsize::new(LevelFilter::Info as usize),
        }
    }

    fn current_level(&self) -> LevelFilter {
        match self.level.load(Ordering::Relaxed) {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn set_level_internal(&self, level: LevelFilter) {
        self.level.store(level as usize, Ordering::Relaxed);
    }
}

fn format_line(timestamp: &str, level: Level, message: &str) -> String {
    format!("{} - {} - {}", timestamp, level, message)
}

impl Log for DynLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.current_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
            let line = format_line(&now, record.level(), &record.args().to_string());
            let _ = writeln!(io::stderr(), "{}", line);
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

static LOGGER: DynLogger = DynLogger::new();

pub fn init_logger(level: Level) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LevelFilter::Trace);
    set_log_level(level);
    Ok(())
}

pub fn set_log_level(level: Level) {
    LOGGER.set_level_internal(level.to_level_filter());
}
