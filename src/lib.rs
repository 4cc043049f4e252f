// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Descriptor readiness watchers dispatched by a run loop.
//!
//! A [`DescriptorWatcher`] owns (or observes) a native descriptor, a set of enabled callback
//! types and a user callback with an opaque [`WatcherContext`]. Binding the watcher to a
//! [`RunLoop`] through a [`RunLoopSource`] makes the run loop poll the descriptor and invoke the
//! callback whenever an enabled readiness condition is reported.
//!
//! ```
//! use std::io::Write;
//! use std::time::Duration;
//!
//! use fdwatch::{CallbackFlags, DescriptorWatcher, RunLoop, WatcherContext};
//!
//! let (rx, mut tx) = base::pipe().unwrap();
//! let watcher = DescriptorWatcher::new(
//!     &rx,
//!     |w, flags, _ctx| {
//!         assert!(flags.contains(CallbackFlags::READ));
//!         w.invalidate();
//!     },
//!     WatcherContext::default(),
//! )?;
//! let run_loop = RunLoop::new()?;
//! run_loop.add_source(&watcher.create_run_loop_source(0))?;
//! watcher.enable_callbacks(CallbackFlags::READ);
//!
//! tx.write_all(b"ping").unwrap();
//! assert_eq!(run_loop.run_once(Some(Duration::from_secs(1)))?, 1);
//! assert!(!watcher.is_valid());
//! # Ok::<(), fdwatch::Error>(())
//! ```

pub mod config;
mod context;
mod flags;
pub mod poller;
mod run_loop;
mod sync;
mod watcher;

use base::RawDescriptor;
use remain::sorted;
use thiserror::Error as ThisError;

pub use crate::config::RunLoopConfig;
pub use crate::context::ContextInfo;
pub use crate::context::WatcherContext;
pub use crate::flags::CallbackFlags;
pub use crate::poller::EpollPoller;
pub use crate::poller::FakePoller;
pub use crate::poller::Poller;
pub use crate::run_loop::RunLoop;
pub use crate::run_loop::RunLoopHandle;
pub use crate::run_loop::RunLoopSource;
pub use crate::watcher::Callback;
pub use crate::watcher::DescriptorWatcher;

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// The watcher is already attached to a run loop.
    #[error("watcher for descriptor {0} is already attached to a run loop")]
    AlreadyAttached(RawDescriptor),
    /// Failed to create the poller backing a run loop.
    #[error("failed to create the run loop poller: {0}")]
    CreatePoller(base::Error),
    /// Another live watcher on the same run loop already watches this descriptor.
    #[error("descriptor {0} is already watched by another source on this run loop")]
    DescriptorInUse(RawDescriptor),
    /// The descriptor is negative or not open.
    #[error("invalid descriptor {0}: {1}")]
    InvalidDescriptor(RawDescriptor, base::Error),
    /// The source is not attached to this run loop.
    #[error("source for descriptor {0} is not attached to this run loop")]
    NotAttached(RawDescriptor),
    /// Waiting for readiness failed.
    #[error("failed to poll for readiness: {0}")]
    Poll(base::Error),
    /// The poller refused the descriptor.
    #[error("failed to register descriptor {0} with the poller: {1}")]
    Register(RawDescriptor, base::Error),
    /// The watcher behind the source has been invalidated.
    #[error("source for descriptor {0} has been invalidated")]
    SourceInvalidated(RawDescriptor),
    /// Failed to wake a blocked run loop.
    #[error("failed to wake the run loop: {0}")]
    Wake(base::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
