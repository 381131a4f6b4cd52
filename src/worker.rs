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

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;

use crate::Level;
use crate::clock::Clock;
use crate::format::format_record;
use crate::rolling::RollingFile;

/// The single consumer of a logger's queue. Owns the rotation state and performs all file I/O.
pub(crate) struct Worker {
    receiver: Receiver<String>,
    rolling: RollingFile,
    buffer: String,
    buffer_size: usize,
    idle_interval: Duration,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    clock: Clock,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum WorkerState {
    Empty,
    Disconnected,
    Continue,
    Shutdown,
}

impl Worker {
    pub(crate) fn new(
        receiver: Receiver<String>,
        rolling: RollingFile,
        buffer_size: usize,
        idle_interval: Duration,
        stop: Arc<AtomicBool>,
        dropped: Arc<AtomicUsize>,
        clock: Clock,
    ) -> Worker {
        Self {
            receiver,
            rolling,
            buffer: String::with_capacity(buffer_size),
            buffer_size,
            idle_interval,
            stop,
            dropped,
            clock,
        }
    }

    fn recv(&mut self) -> WorkerState {
        match self.receiver.recv_timeout(self.idle_interval) {
            Ok(line) => {
                self.accept(&line);
                WorkerState::Continue
            }
            Err(RecvTimeoutError::Timeout) => WorkerState::Empty,
            Err(RecvTimeoutError::Disconnected) => WorkerState::Disconnected,
        }
    }

    /// Buffer one line, flushing once the buffer reached its threshold or nothing else is
    /// immediately queued.
    fn accept(&mut self, line: &str) {
        self.buffer.push_str(line);
        if self.buffer.len() >= self.buffer_size || self.receiver.is_empty() {
            self.flush();
        }
    }

    fn work(&mut self) -> WorkerState {
        if self.stop.load(Ordering::Acquire) {
            return WorkerState::Shutdown;
        }
        self.recv()
    }

    fn flush(&mut self) {
        self.note_dropped();
        if self.buffer.is_empty() {
            return;
        }

        self.rolling.rotate_if_needed();
        self.rolling.write(&self.buffer);
        self.buffer.clear();
        self.rolling.rotate_if_needed();
    }

    fn note_dropped(&mut self) {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            let notice = format_record(
                &self.clock.now(),
                Level::Warn.tag(),
                format_args!("dropped {dropped} log records because the queue was full"),
            );
            self.buffer.push_str(&notice);
        }
    }

    /// Write out whatever is still queued after the stop flag was observed.
    fn drain(&mut self) {
        while let Ok(line) = self.receiver.try_recv() {
            self.accept(&line);
        }
        self.flush();
    }

    pub(crate) fn run(mut self) {
        self.rolling.start();
        loop {
            match self.work() {
                WorkerState::Continue | WorkerState::Empty => {}
                WorkerState::Shutdown | WorkerState::Disconnected => break,
            }
        }
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::num::NonZeroUsize;
    use std::str::FromStr;

    use jiff::Zoned;
    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;
    use crate::trap::NoopTrap;

    fn worker(
        dir: &TempDir,
        receiver: Receiver<String>,
        buffer_size: usize,
        max_size: usize,
        dropped: usize,
    ) -> Worker {
        let clock = Clock::ManualClock(ManualClock::new(
            Zoned::from_str("2024-08-10T08:00:00[UTC]").unwrap(),
        ));
        let rolling = RollingFile::resume(
            dir.path().to_path_buf(),
            "app".to_string(),
            NonZeroUsize::new(max_size).unwrap(),
            clock.clone(),
            Arc::new(NoopTrap::default()),
        );
        Worker::new(
            receiver,
            rolling,
            buffer_size,
            Duration::from_millis(10),
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicUsize::new(dropped)),
            clock,
        )
    }

    fn read(dir: &TempDir, sequence: usize) -> String {
        let path = dir
            .path()
            .join("20240810")
            .join(format!("app_{sequence}.log"));
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_drain_on_shutdown() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let (sender, receiver) = crossbeam_channel::unbounded();
        for i in 0..5 {
            sender.send(format!("line {i}\n")).unwrap();
        }

        // the stop flag is already set, so only the final drain writes
        worker(&temp_dir, receiver, 1024, 1024, 0).run();

        assert_eq!(read(&temp_dir, 0), "line 0\nline 1\nline 2\nline 3\nline 4\n");
    }

    #[test]
    fn test_drain_keeps_rotating() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let (sender, receiver) = crossbeam_channel::unbounded();
        for i in 0..6 {
            sender.send(format!("line {i}\n")).unwrap();
        }

        worker(&temp_dir, receiver, 1, 14, 0).run();

        assert_eq!(read(&temp_dir, 0), "line 0\nline 1\n");
        assert_eq!(read(&temp_dir, 1), "line 2\nline 3\n");
        assert_eq!(read(&temp_dir, 2), "line 4\nline 5\n");
        // the next file is prepared as soon as the previous one is full
        assert_eq!(read(&temp_dir, 3), "");
    }

    #[test]
    fn test_dropped_records_are_noted() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let (sender, receiver) = crossbeam_channel::unbounded();
        sender.send("kept\n".to_string()).unwrap();

        worker(&temp_dir, receiver, 1024, 1024, 3).run();

        assert_eq!(
            read(&temp_dir, 0),
            "kept\n08:00:00.000|Warning|dropped 3 log records because the queue was full\n"
        );
    }

    #[test]
    fn test_disconnected_queue_stops_worker() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let (sender, receiver) = crossbeam_channel::unbounded();
        sender.send("last words\n".to_string()).unwrap();
        drop(sender);

        let mut worker = worker(&temp_dir, receiver, 1024, 1024, 0);
        worker.stop.store(false, Ordering::Release);
        worker.run();

        assert_eq!(read(&temp_dir, 0), "last words\n");
    }
}
