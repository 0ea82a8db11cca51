//! Process-wide fallback logger, in the same spirit as libzetta's own
//! `GlobalLogger`: every engine constructor accepts an explicit
//! `Option<slog::Logger>` and only falls back to this cell when the caller
//! didn't supply one.

use once_cell::sync::OnceCell;
use slog::{o, Drain, Logger as SlogLogger};
use slog_stdlog::StdLog;
use std::ops::Deref;

static GLOBAL_LOGGER: OnceCell<Logger> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct Logger {
    inner: SlogLogger,
}

impl Deref for Logger {
    type Target = SlogLogger;

    fn deref(&self) -> &Self::Target { &self.inner }
}

impl Logger {
    fn new(logger: SlogLogger) -> Self { Logger { inner: logger } }

    /// Get the global fallback logger, initializing it with a `StdLog` drain
    /// on first use if nobody has called [`Logger::setup`] yet.
    pub fn global() -> &'static Logger {
        GLOBAL_LOGGER.get_or_init(|| Logger::new(SlogLogger::root(StdLog.fuse(), o!())))
    }

    /// Install a root logger as the global fallback. Can only be called once;
    /// returns `Err(Logger)` wrapping the logger that was already installed.
    pub fn setup(root_logger: SlogLogger) -> Result<(), Logger> {
        GLOBAL_LOGGER.set(Logger::new(root_logger))
    }

    pub(crate) fn child_or_global(logger: Option<SlogLogger>, tag: &'static str) -> SlogLogger {
        let base = logger.unwrap_or_else(|| Logger::global().inner.clone());
        base.new(o!("engine" => tag))
    }
}
