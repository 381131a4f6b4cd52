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

use std::backtrace::Backtrace;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::Location;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use arc_swap::ArcSwapOption;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;

use crate::Error;
use crate::Level;
use crate::Trap;
use crate::clock::Clock;
use crate::format::format_exception;
use crate::format::format_record;
use crate::rolling::RollingFile;
use crate::rolling::RotationState;
use crate::trap::DefaultTrap;
use crate::worker::Worker;

const DEFAULT_BUFFER_SIZE: usize = 1024;
const DEFAULT_MAX_FILE_SIZE: NonZeroUsize = NonZeroUsize::new(10 * 1024 * 1024).unwrap();
const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(50);

/// An asynchronous logger writing to date and size rotated files.
///
/// Records are formatted on the calling thread and queued; a dedicated worker thread batches
/// them into `<log_dir>/<YYYYMMDD>/<basename>_<N>.log`. None of the logging methods block, fail
/// or panic. Once [`dispose`](Logger::dispose) returned, further records are ignored.
///
/// # Examples
///
/// ```
/// use spoollog::Level;
/// use spoollog::Logger;
///
/// let dir = tempfile::tempdir().unwrap();
/// let logger = Logger::builder("plugins")
///     .log_dir(dir.path())
///     .level(Level::Info)
///     .build()
///     .unwrap();
///
/// logger.log_info("plugin host started");
/// logger.log_debug("filtered out");
///
/// // waits for every queued record to reach the file
/// logger.dispose();
/// ```
#[derive(Debug)]
pub struct Logger {
    basename: String,
    level: Level,
    log_dir: PathBuf,
    clock: Clock,
    trap: Arc<dyn Trap>,
    current: Arc<ArcSwap<RotationState>>,
    state: ArcSwapOption<State>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug)]
struct State {
    sender: Sender<String>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
}

impl Logger {
    /// Create a new [`LoggerBuilder`] for the file base name `basename`.
    pub fn builder(basename: impl Into<String>) -> LoggerBuilder {
        LoggerBuilder::new(basename)
    }

    /// Start a logger for `basename` with every setting at its default.
    ///
    /// # Errors
    ///
    /// See [`LoggerBuilder::build`].
    pub fn new(basename: impl Into<String>) -> Result<Logger, Error> {
        LoggerBuilder::new(basename).build()
    }

    /// Log an `Error` record.
    pub fn log_error(&self, msg: impl fmt::Display) {
        self.log(Level::Error, msg);
    }

    /// Log a `Warning` record.
    pub fn log_warn(&self, msg: impl fmt::Display) {
        self.log(Level::Warn, msg);
    }

    /// Log an `Info` record.
    pub fn log_info(&self, msg: impl fmt::Display) {
        self.log(Level::Info, msg);
    }

    /// Log a `Debug` record.
    pub fn log_debug(&self, msg: impl fmt::Display) {
        self.log(Level::Debug, msg);
    }

    /// Log a record at `level` if the logger's minimum level lets it through.
    pub fn log(&self, level: Level, msg: impl fmt::Display) {
        if !self.level.enables(level) || self.is_disposed() {
            return;
        }
        let line = format_record(&self.clock.now(), level.tag(), msg);
        self.enqueue(line);
    }

    /// Log an `Exception` record for `err`, regardless of the minimum level.
    ///
    /// The record carries the error message, its type name, the caller's location, the chain of
    /// sources and a backtrace. The backtrace is only captured when enabled through
    /// `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE`.
    #[track_caller]
    pub fn log_exception<E>(&self, err: &E)
    where
        E: std::error::Error + ?Sized,
    {
        if self.is_disposed() {
            return;
        }
        let origin = Location::caller();
        let backtrace = Backtrace::capture();
        let line = format_exception(&self.clock.now(), err, origin, &backtrace);
        self.enqueue(line);
    }

    fn enqueue(&self, line: String) {
        let state = self.state.load();
        let Some(state) = state.as_ref() else {
            return;
        };

        match state.sender.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                state.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // the worker is gone; nothing left to write to
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Stop the worker and block until it has written every queued record and exited.
    ///
    /// Calling this more than once is harmless, also from several threads at once: every call
    /// returns only after the worker exited. It is also called when the logger is dropped.
    pub fn dispose(&self) {
        if let Some(state) = self.state.swap(None) {
            state.stop.store(true, Ordering::Release);
        }

        // held across the join so that concurrent callers wait for the same worker
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(Err(_)) = handle.take().map(JoinHandle::join) {
            let err = Error::new("logger worker thread panicked")
                .with_context("basename", &self.basename);
            self.trap.trap(&err);
        }
    }

    /// Whether [`dispose`](Logger::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.state.load().is_none()
    }

    /// The minimum level of records this logger persists.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The file base name of this logger.
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// The directory holding the dated sub-directories and the fallback error file.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// The file the worker currently appends to.
    pub fn current_file(&self) -> PathBuf {
        self.current.load().path().to_path_buf()
    }

    /// The date, sequence number and path the worker currently writes to, read as one
    /// consistent value.
    pub fn rotation_state(&self) -> Arc<RotationState> {
        self.current.load_full()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A builder to configure and start a [`Logger`].
#[derive(Debug)]
#[must_use = "call `build` to start the logger"]
pub struct LoggerBuilder {
    // required
    basename: String,

    // has default
    level: Level,
    buffer_size: usize,
    log_dir: Option<PathBuf>,
    max_file_size: NonZeroUsize,
    buffered_lines_limit: Option<NonZeroUsize>,
    thread_name: Option<String>,
    idle_interval: Duration,
    trap: Arc<dyn Trap>,
    clock: Clock,
}

impl LoggerBuilder {
    /// Create a new logger builder for the file base name `basename`.
    pub fn new(basename: impl Into<String>) -> Self {
        Self {
            basename: basename.into(),
            level: Level::Debug,
            buffer_size: DEFAULT_BUFFER_SIZE,
            log_dir: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            buffered_lines_limit: None,
            thread_name: None,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            trap: Arc::new(DefaultTrap::default()),
            clock: Clock::DefaultClock,
        }
    }

    /// Set the minimum level of persisted records.
    ///
    /// Default to [`Level::Debug`], which persists everything.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the number of buffered bytes at which the worker writes out, even if more records are
    /// queued.
    ///
    /// Default to 1024 bytes.
    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    /// Set the directory holding the dated log directories.
    ///
    /// Default to `Logs` next to the running executable.
    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Set the size in bytes at which the logger moves on to the next file of the day.
    ///
    /// Rotation happens after a write, so a file may exceed this size by up to one buffer.
    /// Default to 10 MiB.
    pub fn max_file_size(mut self, n: NonZeroUsize) -> Self {
        self.max_file_size = n;
        self
    }

    /// Set the number of records that may wait in the queue.
    ///
    /// When the queue is full, new records are dropped and a warning with the number of dropped
    /// records is written later. Default to `None`, an unbounded queue.
    pub fn buffered_lines_limit(mut self, limit: Option<NonZeroUsize>) -> Self {
        self.buffered_lines_limit = limit;
        self
    }

    /// Set the name of the worker thread.
    ///
    /// Default to `spoollog-<basename>`.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Set how long the idle worker waits for a record before checking for shutdown again.
    ///
    /// Default to 50 milliseconds.
    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Set the trap receiving errors of the worker.
    ///
    /// Default to [`DefaultTrap`].
    pub fn trap(mut self, trap: impl Trap) -> Self {
        self.trap = Arc::new(trap);
        self
    }

    #[cfg(test)]
    fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Resolve the file to resume and start the worker thread.
    ///
    /// # Errors
    ///
    /// Return an error if either:
    ///
    /// * The file base name is empty or contains a path separator.
    /// * The worker thread cannot be spawned.
    ///
    /// A log directory that cannot be created is not an error here; it is reported through the
    /// trap and retried by the worker.
    pub fn build(self) -> Result<Logger, Error> {
        let Self {
            basename,
            level,
            buffer_size,
            log_dir,
            max_file_size,
            buffered_lines_limit,
            thread_name,
            idle_interval,
            trap,
            clock,
        } = self;

        if basename.is_empty() {
            return Err(Error::new("file base name must not be empty"));
        }
        if basename.contains(['/', '\\']) {
            return Err(Error::new("file base name must not contain path separators")
                .with_context("basename", &basename));
        }

        let log_dir = log_dir.unwrap_or_else(default_log_dir);
        let rolling = RollingFile::resume(
            log_dir.clone(),
            basename.clone(),
            max_file_size,
            clock.clone(),
            trap.clone(),
        );
        let current = rolling.published();

        let (sender, receiver) = match buffered_lines_limit {
            Some(limit) => crossbeam_channel::bounded(limit.get()),
            None => crossbeam_channel::unbounded(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicUsize::new(0));

        let worker = Worker::new(
            receiver,
            rolling,
            buffer_size,
            idle_interval,
            stop.clone(),
            dropped.clone(),
            clock.clone(),
        );
        let thread_name = thread_name.unwrap_or_else(|| format!("spoollog-{basename}"));
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run())
            .map_err(|err| Error::new("failed to spawn logger worker thread").with_source(err))?;

        let state = State {
            sender,
            stop,
            dropped,
        };

        Ok(Logger {
            basename,
            level,
            log_dir,
            clock,
            trap,
            current,
            state: ArcSwapOption::from(Some(Arc::new(state))),
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// `Logs` next to the running executable, falling back to the working directory.
fn default_log_dir() -> PathBuf {
    let basedir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    basedir.join("Logs")
}
