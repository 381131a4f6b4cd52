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

//! Pre-formatting of records on the caller's thread.
//!
//! Every queued entry is a complete line, `HH:MM:SS.fff|<TAG>|<message>\n`, so the worker only
//! has to concatenate and write.

use std::backtrace::Backtrace;
use std::fmt;
use std::fmt::Write;
use std::panic::Location;

use jiff::Zoned;

pub(crate) const EXCEPTION_TAG: &str = "Exception";

/// The `YYYYMMDD` stamp used for dated directories and the fallback error file.
pub(crate) fn date_stamp(now: &Zoned) -> String {
    now.strftime("%Y%m%d").to_string()
}

pub(crate) fn format_record(now: &Zoned, tag: &str, msg: impl fmt::Display) -> String {
    format!("{}|{tag}|{msg}\n", now.strftime("%H:%M:%S.%3f"))
}

/// Format an error as a single `Exception` record: message, type name, origin, cause chain and
/// backtrace, separated by `;`.
pub(crate) fn format_exception<E>(
    now: &Zoned,
    err: &E,
    origin: &Location<'_>,
    backtrace: &Backtrace,
) -> String
where
    E: std::error::Error + ?Sized,
{
    let mut causes = String::new();
    let mut source = err.source();
    while let Some(cause) = source {
        if !causes.is_empty() {
            causes.push_str(" <- ");
        }
        let _ = write!(causes, "{cause}");
        source = cause.source();
    }

    format_record(
        now,
        EXCEPTION_TAG,
        format_args!(
            "{err};{};{origin};{causes};{backtrace}",
            std::any::type_name::<E>()
        ),
    )
}
