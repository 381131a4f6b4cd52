// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A bridge to forward logs from the `log` crate to a [`Logger`].

use crate::Error;
use crate::Level;
use crate::Logger;

struct LogCrateLogger(&'static Logger);

impl log::Log for LogCrateLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.0.level().enables(Level::from(metadata.level()))
    }

    fn log(&self, record: &log::Record) {
        self.0.log(Level::from(record.level()), record.args());
    }

    fn flush(&self) {}
}

/// Install `logger` as the `log` crate global logger.
///
/// The logger lives for the rest of the program. The returned reference can be used to log
/// directly and to [`dispose`](Logger::dispose) the logger before the program exits, so that
/// queued records are written out.
///
/// The global maximum level of the log crate is set to match the logger's minimum level; `trace`
/// records are persisted as `Debug`.
///
/// # Errors
///
/// Return an error if the log crate global logger has already been set. The rejected logger is
/// disposed in that case.
///
/// # Examples
///
/// ```
/// let dir = tempfile::tempdir().unwrap();
/// let logger = spoollog::Logger::builder("app")
///     .log_dir(dir.path())
///     .build()
///     .unwrap();
///
/// let logger = spoollog::bridge::try_setup_log_crate(logger).unwrap();
/// log::info!("forwarded to the rolling files");
/// logger.dispose();
/// ```
pub fn try_setup_log_crate(logger: Logger) -> Result<&'static Logger, Error> {
    let logger: &'static Logger = Box::leak(Box::new(logger));
    if let Err(err) = log::set_boxed_logger(Box::new(LogCrateLogger(logger))) {
        logger.dispose();
        return Err(Error::new("failed to set up log crate global logger").with_source(err));
    }
    log::set_max_level(logger.level().to_level_filter());
    Ok(logger)
}

/// Install `logger` as the `log` crate global logger.
///
/// # Panics
///
/// Panic if the log crate global logger has already been set.
pub fn setup_log_crate(logger: Logger) -> &'static Logger {
    try_setup_log_crate(logger).expect(
        "spoollog::bridge::setup_log_crate must be called before the log crate global logger initialized",
    )
}
