// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process-wide logging setup.
//!
//! Log records are produced with the `log` macros (re-exported from this crate) and written to
//! stderr by an `env_logger` backend. Until `syslog::init()` or `syslog::init_with()` returns
//! `Ok`, records are silently dropped.
//!
//! # Examples
//!
//! ```
//! use base::syslog;
//! use base::warn;
//!
//! if let Err(e) = syslog::init() {
//!     println!("failed to initialize logging: {}", e);
//!     return;
//! }
//! warn!("this is your {} warning", "final");
//! ```

use std::env;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::SecondsFormat;
use chrono::Utc;
use log::Record;
use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

/// Filter used when neither `LogConfig::filter` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "info";

/// Errors returned by `syslog::init()`.
#[sorted]
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Some other logger claimed the process-wide `log` slot first.
    #[error("a different logger was already installed for this process")]
    LoggerInstalled,
}

/// Settings for `init_with`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `env_logger` filter directives, e.g. `"debug"` or `"fdwatch::run_loop=trace,info"`.
    /// Falls back to `RUST_LOG`, then to `DEFAULT_FILTER`.
    pub filter: Option<String>,
    /// Name printed in front of every record. Defaults to the file name of `argv[0]`.
    pub proc_name: Option<String>,
    /// Omit the `[file:line]` prefix.
    pub hide_location: bool,
}

static INIT_RESULT: OnceLock<Result<(), Error>> = OnceLock::new();

fn get_proc_name() -> Option<String> {
    env::args_os()
        .next()
        .map(PathBuf::from)
        .and_then(|s| s.file_name().map(OsStr::to_os_string))
        .map(OsString::into_string)
        .and_then(Result::ok)
}

/// Initializes logging with the default `LogConfig`.
pub fn init() -> Result<(), Error> {
    init_with(LogConfig::default())
}

/// Installs the process logger.
///
/// Only the first call has any effect; every later call returns the result of the first one.
pub fn init_with(cfg: LogConfig) -> Result<(), Error> {
    *INIT_RESULT.get_or_init(|| {
        let filter = cfg
            .filter
            .or_else(|| env::var("RUST_LOG").ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let proc_name = cfg.proc_name.or_else(get_proc_name);
        let show_location = !cfg.hide_location;

        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&filter);
        builder.target(env_logger::Target::Stderr);
        builder.format(move |buf, record| {
            write_record(buf, proc_name.as_deref(), show_location, record)
        });
        builder.try_init().map_err(|_| Error::LoggerInstalled)
    })
}

/// Returns `true` once a call to `init` or `init_with` has succeeded.
pub fn is_initialized() -> bool {
    matches!(INIT_RESULT.get(), Some(Ok(())))
}

fn write_record(
    out: &mut dyn Write,
    proc_name: Option<&str>,
    show_location: bool,
    record: &Record,
) -> io::Result<()> {
    write!(
        out,
        "{} {:<5} ",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        record.level()
    )?;
    if let Some(name) = proc_name {
        write!(out, "{}[{}]: ", name, std::process::id())?;
    }
    if show_location {
        if let Some(path) = record.file() {
            write!(out, "[{}", path)?;
            if let Some(line) = record.line() {
                write!(out, ":{}", line)?;
            }
            write!(out, "] ")?;
        }
    }
    writeln!(out, "{}", record.args())
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;

    fn render(proc_name: Option<&str>, show_location: bool) -> String {
        let mut out = Vec::new();
        write_record(
            &mut out,
            proc_name,
            show_location,
            &Record::builder()
                .level(Level::Warn)
                .file(Some("src/run_loop.rs"))
                .line(Some(42))
                .args(format_args!("descriptor {} hung up", 7))
                .build(),
        )
        .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn record_has_level_location_and_message() {
        let line = render(Some("fdwatch"), true);
        assert!(line.contains("WARN "));
        assert!(line.contains("fdwatch["));
        assert!(line.contains("[src/run_loop.rs:42] "));
        assert!(line.ends_with("descriptor 7 hung up\n"));
    }

    #[test]
    fn location_can_be_hidden() {
        let line = render(None, false);
        assert!(!line.contains("run_loop.rs"));
        assert!(line.ends_with("descriptor 7 hung up\n"));
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_with(LogConfig {
            filter: Some("debug".to_string()),
            ..Default::default()
        });
        assert_eq!(init(), first);
        assert_eq!(is_initialized(), first.is_ok());
    }
}
