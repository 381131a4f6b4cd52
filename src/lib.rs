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

//! An asynchronous logger that spools records into date and size rotated files.
//!
//! # Overview
//!
//! A [`Logger`] formats each record on the calling thread and pushes it onto a queue without
//! blocking. A dedicated worker thread drains the queue, batches records in memory and appends
//! them to
//!
//! ```text
//! <log_dir>/<YYYYMMDD>/<basename>_<N>.log
//! ```
//!
//! A new directory is started when the date changes, and the next `N` once a file reached its
//! maximum size. A restarted logger resumes the last file of the day if it still has room.
//! Writes that fail are reported through a [`Trap`] and diverted, together with the failed
//! records, to `<log_dir>/ErrorLog_<YYYYMMDD>.log`.
//!
//! # Examples
//!
//! ```
//! use std::num::NonZeroUsize;
//!
//! use spoollog::Level;
//! use spoollog::Logger;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let logger = Logger::builder("host")
//!     .log_dir(dir.path())
//!     .level(Level::Info)
//!     .max_file_size(NonZeroUsize::new(1024 * 1024).unwrap())
//!     .build()
//!     .unwrap();
//!
//! logger.log_info("loaded 3 plugins");
//! logger.log_warn(format_args!("plugin {} is outdated", "exporter"));
//!
//! let err = std::io::Error::other("plugin crashed");
//! logger.log_exception(&err);
//!
//! logger.dispose();
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bridge;
pub mod trap;

mod clock;
mod error;
mod format;
mod level;
mod logger;
mod rolling;
mod worker;

pub use self::error::Error;
pub use self::level::Level;
pub use self::logger::Logger;
pub use self::logger::LoggerBuilder;
pub use self::rolling::RotationState;
pub use self::trap::Trap;
