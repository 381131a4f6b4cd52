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

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use jiff::Zoned;

use crate::Error;
use crate::Trap;
use crate::clock::Clock;
use crate::format::date_stamp;

/// The date, sequence number and path of the file a logger currently writes to.
///
/// The three values always belong together: `path` is
/// `<log_dir>/<date>/<basename>_<sequence>.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationState {
    pub(crate) date: String,
    pub(crate) sequence: usize,
    pub(crate) path: PathBuf,
}

impl RotationState {
    /// The `YYYYMMDD` date of the current directory.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// The sequence number of the current file within its date.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// The path of the current file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rotation state of one log stream.
///
/// Built on the constructing thread and then moved into the worker, which owns it exclusively.
/// Every change is published to `published` so other threads can read a consistent triple.
#[derive(Debug)]
pub(crate) struct RollingFile {
    log_dir: PathBuf,
    basename: String,
    max_size: NonZeroUsize,
    date: String,
    sequence: usize,
    path: PathBuf,
    clock: Clock,
    trap: Arc<dyn Trap>,
    published: Arc<ArcSwap<RotationState>>,
}

#[derive(Debug)]
struct LogFile {
    sequence: usize,
    len: u64,
}

impl RollingFile {
    /// Resolve the file to resume for today: the highest existing sequence number, or the next
    /// one if that file already reached the size cap.
    pub(crate) fn resume(
        log_dir: PathBuf,
        basename: String,
        max_size: NonZeroUsize,
        clock: Clock,
        trap: Arc<dyn Trap>,
    ) -> RollingFile {
        let date = date_stamp(&clock.now());
        let sequence = 0;
        let path = join_path(&log_dir, &date, &basename, sequence);
        let published = Arc::new(ArcSwap::from_pointee(RotationState {
            date: date.clone(),
            sequence,
            path: path.clone(),
        }));

        let mut rolling = RollingFile {
            log_dir,
            basename,
            max_size,
            date,
            sequence,
            path,
            clock,
            trap,
            published,
        };

        let last = rolling
            .list_logfiles()
            .into_iter()
            .max_by_key(|file| file.sequence);
        if let Some(last) = last {
            rolling.sequence = if rolling.reached_max_size(last.len) {
                last.sequence + 1
            } else {
                last.sequence
            };
            rolling.path = rolling.current_path();
            rolling.publish();
        }

        rolling
    }

    pub(crate) fn published(&self) -> Arc<ArcSwap<RotationState>> {
        self.published.clone()
    }

    /// Prepare the file for the first write of the worker.
    pub(crate) fn start(&mut self) {
        let now = self.clock.now();
        let date = date_stamp(&now);
        if date != self.date {
            self.date = date;
            self.sequence = 0;
            self.path = self.current_path();
            self.publish();
        }
        if self.prepare_dir() {
            self.prepare_file();
        }
    }

    /// Roll over to a new date directory, or to the next sequence number once the current file
    /// reached the size cap.
    pub(crate) fn rotate_if_needed(&mut self) {
        let now = self.clock.now();
        let date = date_stamp(&now);
        if date != self.date {
            self.date = date;
            self.sequence = 0;
            self.path = self.current_path();
            if self.prepare_dir() {
                self.prepare_file();
            }
            self.publish();
            return;
        }

        // a missing or unreadable file is not rotated; the next write retries the same path
        let len = match fs::metadata(&self.path) {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => return,
        };
        if self.reached_max_size(len) {
            self.sequence += 1;
            self.path = self.current_path();
            self.prepare_file();
            self.publish();
        }
    }

    /// Append `payload` to the current file. Failures are reported to the trap and the payload
    /// is diverted to the fallback error file.
    pub(crate) fn write(&self, payload: &str) {
        let mut result = append_to(&self.path, payload);
        // the dated directory was never created or has been removed since
        if result.is_err() && !self.log_dir.join(&self.date).is_dir() && self.prepare_dir() {
            result = append_to(&self.path, payload);
        }
        if let Err(err) = result {
            let err = Error::new("failed to write log file")
                .with_context("path", self.path.display())
                .with_source(err);
            self.trap.trap(&err);
            self.write_fallback(&err, payload);
        }
    }

    /// Best effort: a failure here has nowhere left to go and is swallowed.
    fn write_fallback(&self, err: &Error, payload: &str) {
        let now = self.clock.now();
        let path = fallback_path(&self.log_dir, &now);
        let record = format!("{}|{err}\n{payload}", now.strftime("%H:%M:%S.%3f"));
        let _ = fs::create_dir_all(&self.log_dir);
        let _ = append_to(&path, &record);
    }

    fn prepare_dir(&self) -> bool {
        let dir = self.log_dir.join(&self.date);
        match create_dir(&dir) {
            Ok(()) => true,
            Err(err) => {
                self.trap.trap(&err);
                false
            }
        }
    }

    fn prepare_file(&self) {
        if let Err(err) = create_file(&self.path) {
            self.trap.trap(&err);
        }
    }

    fn publish(&self) {
        self.published.store(Arc::new(RotationState {
            date: self.date.clone(),
            sequence: self.sequence,
            path: self.path.clone(),
        }));
    }

    fn current_path(&self) -> PathBuf {
        join_path(&self.log_dir, &self.date, &self.basename, self.sequence)
    }

    fn reached_max_size(&self, len: u64) -> bool {
        len >= self.max_size.get() as u64
    }

    fn list_logfiles(&self) -> Vec<LogFile> {
        // a missing directory simply means nothing was written today
        let Ok(read_dir) = fs::read_dir(self.log_dir.join(&self.date)) else {
            return vec![];
        };

        read_dir
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let metadata = entry.metadata().ok()?;
                // the logger only creates files, not directories or symlinks
                if !metadata.is_file() {
                    return None;
                }

                let filename = entry.file_name();
                // if the filename is not a UTF-8 string, skip it.
                let filename = filename.to_str()?;
                let sequence = parse_sequence(filename, &self.basename)?;

                Some(LogFile {
                    sequence,
                    len: metadata.len(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
impl RollingFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn sequence(&self) -> usize {
        self.sequence
    }

    fn date(&self) -> &str {
        &self.date
    }
}

/// `<logDir>/<date>/<basename>_<sequence>.log`
pub(crate) fn join_path(log_dir: &Path, date: &str, basename: &str, sequence: usize) -> PathBuf {
    log_dir.join(date).join(format!("{basename}_{sequence}.log"))
}

/// `<logDir>/ErrorLog_<date>.log`
pub(crate) fn fallback_path(log_dir: &Path, now: &Zoned) -> PathBuf {
    log_dir.join(format!("ErrorLog_{}.log", date_stamp(now)))
}

/// Extract `N` from `<basename>_<N>.log`.
fn parse_sequence(filename: &str, basename: &str) -> Option<usize> {
    let sequence = filename
        .strip_prefix(basename)?
        .strip_prefix('_')?
        .strip_suffix(".log")?;
    if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    usize::from_str(sequence).ok()
}

fn create_dir(path: &Path) -> Result<(), Error> {
    fs::create_dir_all(path).map_err(|err| {
        Error::from_io_error("failed to create log directory", err)
            .with_context("path", path.display())
    })
}

fn create_file(path: &Path) -> Result<(), Error> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map(drop)
        .map_err(|err| {
            Error::from_io_error("failed to create log file", err)
                .with_context("path", path.display())
        })
}

fn append_to(path: &Path, text: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).create(true).open(path)?;
    file.write_all(text.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, Default)]
    struct CollectTrap(Mutex<Vec<String>>);

    impl Trap for CollectTrap {
        fn trap(&self, err: &Error) {
            self.0.lock().unwrap().push(err.to_string());
        }
    }

    fn zoned(s: &str) -> Zoned {
        Zoned::from_str(s).unwrap()
    }

    fn rolling_file(dir: &Path, max_size: usize, clock: &ManualClock) -> RollingFile {
        RollingFile::resume(
            dir.to_path_buf(),
            "app".to_string(),
            NonZeroUsize::new(max_size).unwrap(),
            Clock::ManualClock(clock.clone()),
            Arc::new(CollectTrap::default()),
        )
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("app_0.log", "app"), Some(0));
        assert_eq!(parse_sequence("app_17.log", "app"), Some(17));
        assert_eq!(parse_sequence("app_x_1.log", "app"), None);
        assert_eq!(parse_sequence("app_1.txt", "app"), None);
        assert_eq!(parse_sequence("app_.log", "app"), None);
        assert_eq!(parse_sequence("app_+1.log", "app"), None);
        assert_eq!(parse_sequence("other_1.log", "app"), None);
        assert_eq!(parse_sequence("app_x_1.log", "app_x"), Some(1));
    }

    #[test]
    fn test_resume_in_empty_directory() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let clock = ManualClock::new(zoned("2024-08-10T08:00:00[UTC]"));

        let mut rolling = rolling_file(temp_dir.path(), 100, &clock);
        assert_eq!(rolling.date(), "20240810");
        assert_eq!(rolling.sequence(), 0);
        assert_eq!(rolling.path(), temp_dir.path().join("20240810").join("app_0.log"));
        assert!(!rolling.path().exists());

        rolling.start();
        assert!(rolling.path().is_file());
        assert_eq!(fs::metadata(rolling.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_resume_partially_filled_file() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let dated = temp_dir.path().join("20240810");
        fs::create_dir_all(&dated).unwrap();
        fs::write(dated.join("app_0.log"), "x".repeat(120)).unwrap();
        fs::write(dated.join("app_1.log"), "x".repeat(30)).unwrap();
        fs::write(dated.join("other_5.log"), "x").unwrap();

        let clock = ManualClock::new(zoned("2024-08-10T08:00:00[UTC]"));
        let rolling = rolling_file(temp_dir.path(), 100, &clock);
        assert_eq!(rolling.sequence(), 1);
        assert_eq!(rolling.path(), dated.join("app_1.log"));
        assert_eq!(rolling.published().load().sequence(), 1);
    }

    #[test]
    fn test_resume_after_full_file() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let dated = temp_dir.path().join("20240810");
        fs::create_dir_all(&dated).unwrap();
        fs::write(dated.join("app_0.log"), "x".repeat(100)).unwrap();

        let clock = ManualClock::new(zoned("2024-08-10T08:00:00[UTC]"));
        let rolling = rolling_file(temp_dir.path(), 100, &clock);
        assert_eq!(rolling.sequence(), 1);
        assert_eq!(rolling.path(), dated.join("app_1.log"));
    }

    #[test]
    fn test_rotate_on_size() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let clock = ManualClock::new(zoned("2024-08-10T08:00:00[UTC]"));
        let mut rolling = rolling_file(temp_dir.path(), 10, &clock);
        rolling.start();

        rolling.write("12345");
        rolling.rotate_if_needed();
        assert_eq!(rolling.sequence(), 0);

        rolling.write("67890abc");
        rolling.rotate_if_needed();
        assert_eq!(rolling.sequence(), 1);
        assert!(rolling.path().is_file());

        let first = temp_dir.path().join("20240810").join("app_0.log");
        assert_eq!(fs::read_to_string(first).unwrap(), "1234567890abc");
        assert_eq!(rolling.published().load().path(), rolling.path());
    }

    #[test]
    fn test_rotate_on_date_resets_sequence() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let clock = ManualClock::new(zoned("2024-08-10T23:59:59[UTC]"));
        let mut rolling = rolling_file(temp_dir.path(), 10, &clock);
        rolling.start();

        rolling.write("0123456789");
        rolling.rotate_if_needed();
        assert_eq!(rolling.sequence(), 1);

        clock.set_now(zoned("2024-08-11T00:00:01[UTC]"));
        rolling.rotate_if_needed();
        assert_eq!(rolling.date(), "20240811");
        assert_eq!(rolling.sequence(), 0);
        assert_eq!(rolling.path(), temp_dir.path().join("20240811").join("app_0.log"));
        assert!(rolling.path().is_file());

        let snapshot = rolling.published().load_full();
        assert_eq!(snapshot.date(), "20240811");
        assert_eq!(snapshot.sequence(), 0);
    }

    #[test]
    fn test_start_follows_date_change_since_construction() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let clock = ManualClock::new(zoned("2024-08-10T23:59:59[UTC]"));
        let mut rolling = rolling_file(temp_dir.path(), 10, &clock);

        clock.set_now(zoned("2024-08-11T00:00:00[UTC]"));
        rolling.start();
        assert_eq!(rolling.path(), temp_dir.path().join("20240811").join("app_0.log"));
        assert!(rolling.path().is_file());
    }

    #[test]
    fn test_write_failure_goes_to_fallback_file() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let clock = ManualClock::new(zoned("2024-08-10T08:00:00[UTC]"));
        let trap = Arc::new(CollectTrap::default());
        let mut rolling = RollingFile::resume(
            temp_dir.path().to_path_buf(),
            "app".to_string(),
            NonZeroUsize::new(100).unwrap(),
            Clock::ManualClock(clock.clone()),
            trap.clone(),
        );

        // occupy the log file path with a directory so that appending fails
        fs::create_dir_all(rolling.path()).unwrap();
        rolling.start();
        rolling.write("08:00:00.000|Info|precious\n");
        rolling.rotate_if_needed();

        let errors = trap.0.lock().unwrap();
        assert!(errors.iter().any(|e| e.starts_with("failed to create log file")));
        assert!(errors.iter().any(|e| e.starts_with("failed to write log file")));

        let fallback = temp_dir.path().join("ErrorLog_20240810.log");
        let content = fs::read_to_string(fallback).unwrap();
        assert!(content.contains("failed to write log file"), "{content}");
        assert!(content.ends_with("\n08:00:00.000|Info|precious\n"), "{content}");
    }

    #[test]
    fn test_write_recreates_removed_directory() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let clock = ManualClock::new(zoned("2024-08-10T08:00:00[UTC]"));
        let trap = Arc::new(CollectTrap::default());
        let mut rolling = RollingFile::resume(
            temp_dir.path().to_path_buf(),
            "app".to_string(),
            NonZeroUsize::new(100).unwrap(),
            Clock::ManualClock(clock),
            trap.clone(),
        );
        rolling.start();
        rolling.write("first\n");

        fs::remove_dir_all(temp_dir.path().join("20240810")).unwrap();
        rolling.rotate_if_needed();
        rolling.write("second\n");

        assert_eq!(fs::read_to_string(rolling.path()).unwrap(), "second\n");
        assert!(!temp_dir.path().join("ErrorLog_20240810.log").exists());
        assert!(trap.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_directory_creation_failure_is_reported() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        // a regular file where the log directory should be
        let log_dir = temp_dir.path().join("Logs");
        fs::write(&log_dir, "not a directory").unwrap();

        let clock = ManualClock::new(zoned("2024-08-10T08:00:00[UTC]"));
        let trap = Arc::new(CollectTrap::default());
        let mut rolling = RollingFile::resume(
            log_dir,
            "app".to_string(),
            NonZeroUsize::new(100).unwrap(),
            Clock::ManualClock(clock),
            trap.clone(),
        );
        rolling.start();
        rolling.write("lost\n");

        let errors = trap.0.lock().unwrap();
        assert!(errors.iter().any(|e| e.starts_with("failed to create log directory")));
        assert!(errors.iter().any(|e| e.starts_with("failed to write log file")));
    }
}
