// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque user value handed to a watcher's callback.
pub type ContextInfo = Arc<dyn Any + Send + Sync>;

type RetainHook = Arc<dyn Fn(&ContextInfo) -> ContextInfo + Send + Sync>;
type ReleaseHook = Arc<dyn Fn(&ContextInfo) + Send + Sync>;
type DescribeHook = Arc<dyn Fn(&ContextInfo) -> String + Send + Sync>;

/// User context of a `DescriptorWatcher` and the hooks managing its lifetime.
///
/// * `retain` runs once when the watcher is created and its result replaces the info.
/// * `release` runs once when the watcher is invalidated or dropped.
/// * `describe` is used for diagnostic output.
///
/// Hooks only run when an info value is present.
#[derive(Clone, Default)]
pub struct WatcherContext {
    info: Option<ContextInfo>,
    retain: Option<RetainHook>,
    release: Option<ReleaseHook>,
    describe: Option<DescribeHook>,
}

impl WatcherContext {
    /// Creates a context carrying `info` and no hooks.
    pub fn new<T: Any + Send + Sync>(info: T) -> WatcherContext {
        WatcherContext::from_info(Arc::new(info))
    }

    /// Creates a context from an already shared info value.
    pub fn from_info(info: ContextInfo) -> WatcherContext {
        WatcherContext {
            info: Some(info),
            ..Default::default()
        }
    }

    pub fn with_retain<F>(mut self, retain: F) -> WatcherContext
    where
        F: Fn(&ContextInfo) -> ContextInfo + Send + Sync + 'static,
    {
        self.retain = Some(Arc::new(retain));
        self
    }

    pub fn with_release<F>(mut self, release: F) -> WatcherContext
    where
        F: Fn(&ContextInfo) + Send + Sync + 'static,
    {
        self.release = Some(Arc::new(release));
        self
    }

    pub fn with_describe<F>(mut self, describe: F) -> WatcherContext
    where
        F: Fn(&ContextInfo) -> String + Send + Sync + 'static,
    {
        self.describe = Some(Arc::new(describe));
        self
    }

    pub fn info(&self) -> Option<&ContextInfo> {
        self.info.as_ref()
    }

    /// Returns the info downcast to `T`, or `None` if absent or of another type.
    pub fn info_as<T: Any>(&self) -> Option<&T> {
        self.info.as_deref().and_then(|info| info.downcast_ref())
    }

    pub fn has_retain(&self) -> bool {
        self.retain.is_some()
    }

    pub fn has_release(&self) -> bool {
        self.release.is_some()
    }

    pub fn has_describe(&self) -> bool {
        self.describe.is_some()
    }

    /// Renders the info through the describe hook.
    pub fn describe(&self) -> Option<String> {
        match (&self.info, &self.describe) {
            (Some(info), Some(describe)) => Some(describe(info)),
            _ => None,
        }
    }

    /// Runs the retain hook, returning the context to store in the watcher.
    pub(crate) fn retained(mut self) -> WatcherContext {
        let retained = match (&self.info, &self.retain) {
            (Some(info), Some(retain)) => Some(retain(info)),
            _ => None,
        };
        if retained.is_some() {
            self.info = retained;
        }
        self
    }

    /// Runs the release hook, consuming the stored context.
    pub(crate) fn release(self) {
        if let (Some(info), Some(release)) = (&self.info, &self.release) {
            release(info);
        }
    }
}

impl fmt::Debug for WatcherContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WatcherContext")
            .field("info", &self.describe().unwrap_or_else(|| "<opaque>".into()))
            .field("has_info", &self.info.is_some())
            .field("retain", &self.retain.is_some())
            .field("release", &self.release.is_some())
            .field("describe", &self.describe.is_some())
            .finish()
    }
}
