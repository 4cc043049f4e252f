// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use base::debug;
use base::warn;
use base::RawDescriptor;
use slab::Slab;

use crate::poller::EpollPoller;
use crate::poller::Poller;
use crate::sync::Mutex;
use crate::watcher::WatcherInner;
use crate::CallbackFlags;
use crate::DescriptorWatcher;
use crate::Error;
use crate::Result;
use crate::RunLoopConfig;

/// Binds a `DescriptorWatcher` to a run loop with a dispatch order.
///
/// Invalidating the source invalidates the watcher.
#[derive(Clone)]
pub struct RunLoopSource {
    watcher: DescriptorWatcher,
    order: i64,
}

impl RunLoopSource {
    pub(crate) fn new(watcher: DescriptorWatcher, order: i64) -> RunLoopSource {
        RunLoopSource { watcher, order }
    }

    pub fn order(&self) -> i64 {
        self.order
    }

    pub fn watcher(&self) -> &DescriptorWatcher {
        &self.watcher
    }

    pub fn is_valid(&self) -> bool {
        self.watcher.is_valid()
    }

    pub fn invalidate(&self) {
        self.watcher.invalidate()
    }
}

impl fmt::Debug for RunLoopSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RunLoopSource")
            .field("order", &self.order)
            .field("watcher", &self.watcher)
            .finish()
    }
}

struct SourceEntry {
    order: i64,
    watcher: DescriptorWatcher,
}

/// A watcher's attachment to a run loop, owned by the watcher.
pub(crate) struct Registration {
    run_loop: Weak<RunLoopInner>,
    token: usize,
    // Interest currently registered with the poller.
    armed: CallbackFlags,
}

impl Registration {
    pub(crate) fn new(run_loop: &Arc<RunLoopInner>, token: usize) -> Registration {
        Registration {
            run_loop: Arc::downgrade(run_loop),
            token,
            armed: CallbackFlags::empty(),
        }
    }

    pub(crate) fn run_loop(&self) -> Option<Arc<RunLoopInner>> {
        self.run_loop.upgrade()
    }

    /// Interest the poller currently holds for this registration.
    pub(crate) fn armed(&self) -> CallbackFlags {
        self.armed
    }

    pub(crate) fn belongs_to(&self, run_loop: &RunLoopInner) -> bool {
        std::ptr::eq(self.run_loop.as_ptr(), run_loop)
    }
}

pub(crate) struct RunLoopInner {
    poller: Box<dyn Poller>,
    sources: Mutex<Slab<SourceEntry>>,
    stopped: AtomicBool,
    default_timeout: Option<Duration>,
}

impl RunLoopInner {
    /// Registers `interest` for a fresh registration. Nothing is registered for empty interest.
    pub(crate) fn arm(
        &self,
        descriptor: RawDescriptor,
        registration: &mut Registration,
        interest: CallbackFlags,
    ) -> base::Result<()> {
        if !interest.is_empty() {
            self.poller
                .register(descriptor, interest, registration.token as u64)?;
            registration.armed = interest;
        }
        Ok(())
    }

    /// Updates the poller so that `registration` is armed for exactly `interest`.
    pub(crate) fn sync_interest(
        &self,
        descriptor: RawDescriptor,
        registration: &mut Registration,
        interest: CallbackFlags,
    ) {
        if registration.armed == interest {
            return;
        }
        let token = registration.token as u64;
        let res = if interest.is_empty() {
            self.poller.deregister(descriptor)
        } else if registration.armed.is_empty() {
            self.poller.register(descriptor, interest, token)
        } else {
            self.poller.reregister(descriptor, interest, token)
        };
        match res {
            Ok(()) => registration.armed = interest,
            Err(e) => {
                warn!(
                    "failed to update poller interest of descriptor {} to {:?}: {}",
                    descriptor, interest, e
                );
                // The kernel drops closed descriptors by itself, so a failed removal still
                // leaves nothing armed.
                if interest.is_empty() {
                    registration.armed = interest;
                }
            }
        }
    }

    /// Removes the poller registration of `registration`, leaving the source table alone.
    pub(crate) fn disarm(&self, descriptor: RawDescriptor, registration: &Registration) {
        if registration.armed.is_empty() {
            return;
        }
        if let Err(e) = self.poller.deregister(descriptor) {
            warn!(
                "failed to remove descriptor {} from the poller: {}",
                descriptor, e
            );
        }
    }

    /// Drops an invalidated watcher from the poller and the source table.
    pub(crate) fn remove_registration(
        &self,
        descriptor: RawDescriptor,
        registration: &Registration,
        owner: &WatcherInner,
    ) {
        self.disarm(descriptor, registration);
        let mut sources = self.sources.lock();
        // The slot may have been handed to another watcher after a concurrent remove_source.
        if sources
            .get(registration.token)
            .map_or(false, |entry| entry.watcher.is_inner(owner))
        {
            sources.remove(registration.token);
        }
    }
}

/// Dispatches `DescriptorWatcher` callbacks as their descriptors become ready.
///
/// The thread calling [`run_once`](Self::run_once) or [`run`](Self::run) is the only thread on
/// which callbacks run. Use a [`RunLoopHandle`] to stop or wake the run loop from elsewhere.
pub struct RunLoop {
    inner: Arc<RunLoopInner>,
}

impl RunLoop {
    /// Creates an epoll backed run loop with the default configuration.
    pub fn new() -> Result<RunLoop> {
        Self::with_config(&RunLoopConfig::default())
    }

    pub fn with_config(cfg: &RunLoopConfig) -> Result<RunLoop> {
        let poller = EpollPoller::with_max_events(cfg.max_events()).map_err(Error::CreatePoller)?;
        Ok(Self::build(Box::new(poller), cfg.poll_timeout()))
    }

    /// Creates a run loop waiting on `poller`. `run` waits without a timeout.
    pub fn with_poller(poller: Box<dyn Poller>) -> RunLoop {
        Self::build(poller, None)
    }

    fn build(poller: Box<dyn Poller>, default_timeout: Option<Duration>) -> RunLoop {
        RunLoop {
            inner: Arc::new(RunLoopInner {
                poller,
                sources: Mutex::new(Slab::new()),
                stopped: AtomicBool::new(false),
                default_timeout,
            }),
        }
    }

    /// Attaches `source`. Its watcher's enabled callbacks are registered with the poller right away.
    pub fn add_source(&self, source: &RunLoopSource) -> Result<()> {
        let watcher = source.watcher();
        let descriptor = watcher.native_descriptor();
        if !watcher.is_valid() {
            return Err(Error::SourceInvalidated(descriptor));
        }

        let token = {
            let mut sources = self.inner.sources.lock();
            let conflict = sources.iter().find(|(_, entry)| {
                entry.watcher.native_descriptor() == descriptor && entry.watcher.is_valid()
            });
            if let Some((_, entry)) = conflict {
                return Err(if entry.watcher.ptr_eq(watcher) {
                    Error::AlreadyAttached(descriptor)
                } else {
                    Error::DescriptorInUse(descriptor)
                });
            }
            sources.insert(SourceEntry {
                order: source.order(),
                watcher: watcher.clone(),
            })
        };

        if let Err(e) = watcher.attach(&self.inner, token) {
            self.inner.sources.lock().try_remove(token);
            return Err(e);
        }
        debug!(
            "attached descriptor {} to the run loop (order {})",
            descriptor,
            source.order()
        );
        Ok(())
    }

    /// Detaches `source` without invalidating its watcher.
    pub fn remove_source(&self, source: &RunLoopSource) -> Result<()> {
        let watcher = source.watcher();
        {
            let mut sources = self.inner.sources.lock();
            let token = sources
                .iter()
                .find(|(_, entry)| entry.watcher.ptr_eq(watcher))
                .map(|(token, _)| token)
                .ok_or(Error::NotAttached(watcher.native_descriptor()))?;
            sources.remove(token);
        }
        watcher.detach(&self.inner);
        debug!(
            "detached descriptor {} from the run loop",
            watcher.native_descriptor()
        );
        Ok(())
    }

    pub fn contains_source(&self, source: &RunLoopSource) -> bool {
        self.inner
            .sources
            .lock()
            .iter()
            .any(|(_, entry)| entry.watcher.ptr_eq(source.watcher()))
    }

    /// Number of attached sources.
    pub fn len(&self) -> usize {
        self.inner.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits up to `timeout` for readiness and dispatches it. Returns the number of callbacks run.
    pub fn run_once(&self, timeout: Option<Duration>) -> Result<usize> {
        let events = self.inner.poller.poll(timeout).map_err(Error::Poll)?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut ready: Vec<(i64, usize, DescriptorWatcher, CallbackFlags)> = {
            let sources = self.inner.sources.lock();
            events
                .iter()
                .filter_map(|event| {
                    let token = usize::try_from(event.token).ok()?;
                    let entry = sources.get(token)?;
                    Some((
                        entry.order,
                        token,
                        entry.watcher.clone(),
                        CallbackFlags::from_triggered(event),
                    ))
                })
                .collect()
        };
        ready.sort_by_key(|&(order, token, _, _)| (order, token));

        let mut dispatched = 0;
        for (_, _, watcher, readiness) in ready {
            if watcher.perform(readiness) {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Dispatches until [`RunLoopHandle::stop`] or [`RunLoop::stop`] is called. A stop requested
    /// while the run loop isn't running makes the next `run` return right away.
    pub fn run(&self) -> Result<()> {
        while !self.inner.stopped.swap(false, Ordering::AcqRel) {
            self.run_once(self.inner.default_timeout)?;
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.handle().stop()
    }

    pub fn handle(&self) -> RunLoopHandle {
        RunLoopHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        let entries: Vec<SourceEntry> = self.inner.sources.lock().drain().collect();
        for entry in entries {
            entry.watcher.detach(&self.inner);
        }
    }
}

/// Stops or wakes a `RunLoop` from any thread. Does nothing once the run loop is gone.
#[derive(Clone)]
pub struct RunLoopHandle {
    inner: Weak<RunLoopInner>,
}

impl RunLoopHandle {
    /// Makes the current or next `RunLoop::run` return.
    pub fn stop(&self) -> Result<()> {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.stopped.store(true, Ordering::Release);
                inner.poller.wake().map_err(Error::Wake)
            }
            None => Ok(()),
        }
    }

    /// Makes a blocked `run_once` return early.
    pub fn wake(&self) -> Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.poller.wake().map_err(Error::Wake),
            None => Ok(()),
        }
    }
}
