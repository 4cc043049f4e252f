// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Run loop configuration, read from JSON.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use remain::sorted;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error as ThisError;

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// The configuration is not valid JSON or has unknown fields.
    #[error("failed to parse run loop config: {0}")]
    Parse(serde_json::Error),
    /// The configuration file could not be read.
    #[error("failed to read run loop config {0:?}: {1}")]
    ReadFile(PathBuf, std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn default_max_events() -> usize {
    base::EVENT_CONTEXT_MAX_EVENTS
}

fn default_log_filter() -> String {
    base::syslog::DEFAULT_FILTER.to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RunLoopConfig {
    /// Most readiness reports returned by one poll.
    pub max_events: usize,
    /// Timeout of each poll done by `RunLoop::run`, in milliseconds. `None` blocks until
    /// readiness or a wake.
    pub poll_timeout_ms: Option<u64>,
    /// `env_logger` filter used by the `fdwatch` binary.
    pub log_filter: String,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        RunLoopConfig {
            max_events: default_max_events(),
            poll_timeout_ms: None,
            log_filter: default_log_filter(),
        }
    }
}

impl RunLoopConfig {
    pub fn from_json_str(json: &str) -> Result<RunLoopConfig> {
        serde_json::from_str(json).map_err(Error::Parse)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<RunLoopConfig> {
        let path = path.as_ref();
        let json =
            fs::read_to_string(path).map_err(|e| Error::ReadFile(path.to_path_buf(), e))?;
        Self::from_json_str(&json)
    }

    /// `max_events` with zero raised to one.
    pub fn max_events(&self) -> usize {
        self.max_events.max(1)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg = RunLoopConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, RunLoopConfig::default());
        assert_eq!(cfg.max_events(), 16);
        assert_eq!(cfg.poll_timeout(), None);
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn parse_all_fields() {
        let cfg = RunLoopConfig::from_json_str(
            r#"{"max_events": 4, "poll_timeout_ms": 250, "log_filter": "fdwatch=trace"}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_events(), 4);
        assert_eq!(cfg.poll_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.log_filter, "fdwatch=trace");
    }

    #[test]
    fn zero_max_events_clamped() {
        let cfg = RunLoopConfig::from_json_str(r#"{"max_events": 0}"#).unwrap();
        assert_eq!(cfg.max_events(), 1);
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(matches!(
            RunLoopConfig::from_json_str(r#"{"max_event": 3}"#),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn read_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"poll_timeout_ms": 10}}"#).unwrap();
        let cfg = RunLoopConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.poll_timeout(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        match RunLoopConfig::from_file(&path) {
            Err(Error::ReadFile(p, _)) => assert_eq!(p, path),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn serialize_round_trips_defaults() {
        let json = serde_json::to_string(&RunLoopConfig::default()).unwrap();
        assert_eq!(
            RunLoopConfig::from_json_str(&json).unwrap(),
            RunLoopConfig::default()
        );
    }
}
