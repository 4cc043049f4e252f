// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Macros for retrying syscalls that were interrupted by a signal.
//!
//! `epoll_wait(2)`, `read(2)` and `write(2)` on blocking descriptors may all fail with `EINTR` if
//! a signal handler runs while the call is blocked.

/// Retries the expression while it returns `-1` with errno set to `EINTR`.
///
/// Intended for libc functions that signal failure by returning `-1` and setting `errno`.
#[macro_export]
macro_rules! handle_eintr_errno {
    ($x:expr) => {{
        let mut res;
        loop {
            res = $x;
            if res != -1 || $crate::Error::last() != $crate::Error::new(libc::EINTR) {
                break;
            }
        }
        res
    }};
}

/// Retries the expression while its `std::io::Result` reports `ErrorKind::Interrupted`.
#[macro_export]
macro_rules! handle_eintr {
    ($x:expr) => {{
        let res;
        loop {
            match $x {
                Err(ref e) if e.kind() == ::std::io::ErrorKind::Interrupted => continue,
                v => {
                    res = v;
                    break;
                }
            }
        }
        res
    }};
}
