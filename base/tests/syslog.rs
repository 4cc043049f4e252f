// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use base::syslog;
use base::syslog::LogConfig;

#[test]
fn init_then_log() {
    assert!(!syslog::is_initialized());
    syslog::init_with(LogConfig {
        filter: Some("trace".to_string()),
        proc_name: Some("syslog-test".to_string()),
        hide_location: false,
    })
    .unwrap();
    assert!(syslog::is_initialized());
    assert!(log::log_enabled!(log::Level::Trace));

    base::info!("logging from {}", "an integration test");
    base::trace!("trace is enabled");

    // Later calls keep the first logger.
    syslog::init().unwrap();
}
