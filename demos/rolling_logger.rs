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

//! An example of a plugin host logging through spoollog, directly and via the log crate.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use spoollog::Level;
use spoollog::Logger;

fn main() {
    let level = std::env::var("SPOOLLOG_LEVEL")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::Info);

    let host = Logger::builder("host")
        .log_dir("logs")
        .level(level)
        .max_file_size(NonZeroUsize::new(64 * 1024).unwrap())
        .build()
        .unwrap();
    let host = spoollog::bridge::setup_log_crate(host);

    let plugins = Arc::new(
        Logger::builder("plugins")
            .log_dir("logs")
            .level(level)
            .buffer_size(4096)
            .build()
            .unwrap(),
    );

    log::info!("plugin host started");

    let workers = (0..4)
        .map(|i| {
            let plugins = plugins.clone();
            thread::spawn(move || {
                for n in 0..100 {
                    plugins.log_debug(format_args!("plugin #{i} handled event {n}"));
                }
                plugins.log_info(format_args!("plugin #{i} finished"));
            })
        })
        .collect::<Vec<_>>();
    for worker in workers {
        worker.join().unwrap();
    }

    let err = std::io::Error::other("exporter plugin failed to load");
    host.log_exception(&err);
    log::warn!("continuing without the exporter plugin");

    // write out everything still queued
    plugins.dispose();
    host.dispose();
}
