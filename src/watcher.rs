// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use base::debug;
use base::trace;
use base::validate_raw_descriptor;
use base::AsRawDescriptor;
use base::FromRawDescriptor;
use base::IntoRawDescriptor;
use base::RawDescriptor;
use base::SafeDescriptor;

use crate::run_loop::Registration;
use crate::run_loop::RunLoopInner;
use crate::run_loop::RunLoopSource;
use crate::sync::Mutex;
use crate::CallbackFlags;
use crate::ContextInfo;
use crate::Error;
use crate::Result;
use crate::WatcherContext;

/// Function invoked by the run loop when an enabled callback type becomes ready.
///
/// Receives the watcher, the callback types that fired and the watcher's context info.
pub type Callback = dyn FnMut(&DescriptorWatcher, CallbackFlags, Option<&ContextInfo>) + Send;

struct WatcherState {
    interest: CallbackFlags,
    context: Option<WatcherContext>,
    // Present only when the watcher closes the descriptor on invalidation.
    owned: Option<SafeDescriptor>,
    registration: Option<Registration>,
}

pub(crate) struct WatcherInner {
    descriptor: RawDescriptor,
    close_on_invalidate: bool,
    valid: AtomicBool,
    state: Mutex<WatcherState>,
    callback: Mutex<Box<Callback>>,
}

impl WatcherInner {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    // Brings the poller registration in line with the current interest.
    fn sync_registration(&self, state: &mut WatcherState) {
        let interest = state.interest;
        let mut stale = false;
        if let Some(registration) = state.registration.as_mut() {
            match registration.run_loop() {
                Some(run_loop) => run_loop.sync_interest(self.descriptor, registration, interest),
                None => stale = true,
            }
        }
        if stale {
            // The run loop was dropped without detaching us.
            state.registration = None;
        }
    }

    fn invalidate(&self) {
        let (registration, context, owned) = {
            let mut state = self.state.lock();
            if !self.valid.swap(false, Ordering::AcqRel) {
                return;
            }
            (
                state.registration.take(),
                state.context.take(),
                state.owned.take(),
            )
        };

        if let Some(registration) = registration {
            if let Some(run_loop) = registration.run_loop() {
                run_loop.remove_registration(self.descriptor, &registration, self);
            }
        }
        if let Some(context) = context {
            context.release();
        }
        // Dropping the SafeDescriptor closes the descriptor, after it left the poller.
        drop(owned);
        debug!(
            "invalidated watcher for descriptor {} (closed: {})",
            self.descriptor, self.close_on_invalidate
        );
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        self.invalidate();
    }
}

/// Watches a native descriptor for readiness on behalf of a callback.
///
/// A watcher starts valid with no callback types enabled. Enabled types are one-shot: when the
/// run loop reports a type as ready it is disabled before the callback runs, and the callback
/// must call [`enable_callbacks`](Self::enable_callbacks) again to hear about the next readiness.
///
/// `DescriptorWatcher` is a shared handle; clones refer to the same watcher. The watcher is
/// invalidated by [`invalidate`](Self::invalidate), by invalidating a [`RunLoopSource`] created
/// from it, or when the last handle is dropped. Invalidation is permanent.
///
/// All methods may be called from any thread and from inside the watcher's own callback, but
/// callbacks only ever run on the thread driving the run loop the watcher is attached to.
/// `invalidate` is the operation intended for use from other threads.
#[derive(Clone)]
pub struct DescriptorWatcher {
    inner: Arc<WatcherInner>,
}

impl DescriptorWatcher {
    /// Creates a watcher observing `descriptor`. The caller keeps ownership and the descriptor is
    /// left open on invalidation.
    pub fn new<F>(
        descriptor: &dyn AsRawDescriptor,
        callback: F,
        context: WatcherContext,
    ) -> Result<DescriptorWatcher>
    where
        F: FnMut(&DescriptorWatcher, CallbackFlags, Option<&ContextInfo>) + Send + 'static,
    {
        // SAFETY: with close_on_invalidate unset the watcher never closes the descriptor.
        unsafe {
            Self::from_raw_descriptor(descriptor.as_raw_descriptor(), false, callback, context)
        }
    }

    /// Creates a watcher that takes ownership of `descriptor` and closes it on invalidation.
    pub fn with_ownership<D, F>(
        descriptor: D,
        callback: F,
        context: WatcherContext,
    ) -> Result<DescriptorWatcher>
    where
        D: IntoRawDescriptor,
        F: FnMut(&DescriptorWatcher, CallbackFlags, Option<&ContextInfo>) + Send + 'static,
    {
        let raw = descriptor.into_raw_descriptor();
        // SAFETY: `descriptor` gave up ownership of `raw` so nothing else will use or close it.
        unsafe { Self::from_raw_descriptor(raw, true, callback, context) }
    }

    /// Creates a watcher for a raw descriptor.
    ///
    /// The context's retain hook runs before this returns. On error no hook runs.
    ///
    /// # Errors
    ///
    /// `Error::InvalidDescriptor` if `descriptor` is negative or not open.
    ///
    /// # Safety
    ///
    /// If `close_on_invalidate` is true the caller must own `descriptor` and must not use or close
    /// it once the watcher has been created.
    pub unsafe fn from_raw_descriptor<F>(
        descriptor: RawDescriptor,
        close_on_invalidate: bool,
        callback: F,
        context: WatcherContext,
    ) -> Result<DescriptorWatcher>
    where
        F: FnMut(&DescriptorWatcher, CallbackFlags, Option<&ContextInfo>) + Send + 'static,
    {
        validate_raw_descriptor(descriptor)
            .map_err(|e| Error::InvalidDescriptor(descriptor, e))?;
        let owned = if close_on_invalidate {
            Some(SafeDescriptor::from_raw_descriptor(descriptor))
        } else {
            None
        };
        let context = context.retained();
        debug!(
            "created watcher for descriptor {} (close on invalidate: {})",
            descriptor, close_on_invalidate
        );
        Ok(DescriptorWatcher {
            inner: Arc::new(WatcherInner {
                descriptor,
                close_on_invalidate,
                valid: AtomicBool::new(true),
                state: Mutex::new(WatcherState {
                    interest: CallbackFlags::empty(),
                    context: Some(context),
                    owned,
                    registration: None,
                }),
                callback: Mutex::new(Box::new(callback)),
            }),
        })
    }

    /// Returns the watched descriptor. Still answers after invalidation, but the descriptor may
    /// have been closed by then.
    pub fn native_descriptor(&self) -> RawDescriptor {
        self.inner.descriptor
    }

    pub fn close_on_invalidate(&self) -> bool {
        self.inner.close_on_invalidate
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// Returns a copy of the stored context and hooks. Once the watcher has been invalidated the
    /// context has been released and an empty context is returned.
    pub fn context(&self) -> WatcherContext {
        self.inner.state.lock().context.clone().unwrap_or_default()
    }

    /// Callback types currently enabled.
    pub fn enabled_callbacks(&self) -> CallbackFlags {
        self.inner.state.lock().interest
    }

    /// Enables the given callback types. Does nothing once the watcher is invalid.
    ///
    /// While attached, newly enabled types the poller refuses (`epoll` rejects regular files with
    /// `EPERM`) are logged and stay disabled, so `enabled_callbacks` only reports what can fire.
    pub fn enable_callbacks(&self, flags: CallbackFlags) {
        self.update_interest(|interest| interest | flags);
    }

    /// Disables the given callback types. Does nothing once the watcher is invalid.
    pub fn disable_callbacks(&self, flags: CallbackFlags) {
        self.update_interest(|interest| interest - flags);
    }

    fn update_interest(&self, f: impl FnOnce(CallbackFlags) -> CallbackFlags) {
        let mut state = self.inner.state.lock();
        if !self.inner.is_valid() {
            debug!(
                "ignoring callback change on invalidated watcher for descriptor {}",
                self.inner.descriptor
            );
            return;
        }
        let previous = state.interest;
        state.interest = f(previous);
        self.inner.sync_registration(&mut state);
        let refused = match &state.registration {
            Some(registration) => state.interest - previous - registration.armed(),
            None => CallbackFlags::empty(),
        };
        state.interest.remove(refused);
    }

    /// Permanently invalidates the watcher: detaches it from its run loop, releases the context
    /// and, if the watcher owns the descriptor, closes it. Calling this again does nothing.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Whether the watcher is currently attached to a live run loop.
    pub fn is_attached(&self) -> bool {
        self.inner
            .state
            .lock()
            .registration
            .as_ref()
            .map_or(false, |r| r.run_loop().is_some())
    }

    /// Creates a source binding this watcher to a `RunLoop`. Sources with a lower `order` are
    /// dispatched first when several are ready at once.
    pub fn create_run_loop_source(&self, order: i64) -> RunLoopSource {
        RunLoopSource::new(self.clone(), order)
    }

    /// Diagnostic description including the context's describe output.
    pub fn describe(&self) -> String {
        self.to_string()
    }

    pub(crate) fn ptr_eq(&self, other: &DescriptorWatcher) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_inner(&self, inner: &WatcherInner) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), inner)
    }

    /// Records the attachment to `run_loop` under `token`, registering any enabled interest.
    pub(crate) fn attach(&self, run_loop: &Arc<RunLoopInner>, token: usize) -> Result<()> {
        let descriptor = self.inner.descriptor;
        let mut state = self.inner.state.lock();
        if !self.inner.is_valid() {
            return Err(Error::SourceInvalidated(descriptor));
        }
        if state
            .registration
            .as_ref()
            .map_or(false, |r| r.run_loop().is_some())
        {
            return Err(Error::AlreadyAttached(descriptor));
        }
        let mut registration = Registration::new(run_loop, token);
        run_loop
            .arm(descriptor, &mut registration, state.interest)
            .map_err(|e| Error::Register(descriptor, e))?;
        state.registration = Some(registration);
        Ok(())
    }

    /// Drops the attachment to `run_loop`, if that is where the watcher is attached.
    pub(crate) fn detach(&self, run_loop: &RunLoopInner) {
        let registration = {
            let mut state = self.inner.state.lock();
            match &state.registration {
                Some(r) if r.belongs_to(run_loop) => state.registration.take(),
                _ => None,
            }
        };
        if let Some(registration) = registration {
            run_loop.disarm(self.inner.descriptor, &registration);
        }
    }

    /// Delivers a readiness report from the run loop. Returns whether the callback ran.
    pub(crate) fn perform(&self, readiness: CallbackFlags) -> bool {
        let (triggered, info) = {
            let mut state = self.inner.state.lock();
            if !self.inner.is_valid() {
                return false;
            }
            let triggered = state.interest & readiness;
            if triggered.is_empty() {
                return false;
            }
            state.interest.remove(triggered);
            self.inner.sync_registration(&mut state);
            let info = state.context.as_ref().and_then(|c| c.info().cloned());
            (triggered, info)
        };

        trace!(
            "dispatching {:?} for descriptor {}",
            triggered,
            self.inner.descriptor
        );
        let mut callback = self.inner.callback.lock();
        (*callback)(self, triggered, info.as_ref());
        true
    }
}

impl fmt::Display for DescriptorWatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (interest, context) = {
            let state = self.inner.state.lock();
            (
                state.interest,
                state.context.as_ref().and_then(WatcherContext::describe),
            )
        };
        write!(
            f,
            "<DescriptorWatcher {:p} [{}]>{{valid = {}, fd = {}, callbacks = {:?}, context = ",
            Arc::as_ptr(&self.inner),
            if self.inner.close_on_invalidate {
                "owned"
            } else {
                "borrowed"
            },
            self.is_valid(),
            self.inner.descriptor,
            interest,
        )?;
        match context {
            Some(description) => write!(f, "{}}}", description),
            None => write!(f, "<opaque>}}"),
        }
    }
}

impl fmt::Debug for DescriptorWatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl AsRawDescriptor for DescriptorWatcher {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.inner.descriptor
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    use base::is_descriptor_open;

    use super::*;

    fn noop(_: &DescriptorWatcher, _: CallbackFlags, _: Option<&ContextInfo>) {}

    struct Counters {
        retained: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    fn counting_context(info: u32) -> (WatcherContext, Counters) {
        let retained = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let (r, l) = (retained.clone(), released.clone());
        let ctx = WatcherContext::new(info)
            .with_retain(move |info| {
                r.fetch_add(1, Ordering::SeqCst);
                info.clone()
            })
            .with_release(move |_| {
                l.fetch_add(1, Ordering::SeqCst);
            });
        (ctx, Counters { retained, released })
    }

    #[test]
    fn new_watcher_is_valid_with_no_callbacks() {
        let (rx, _tx) = base::pipe().unwrap();
        let w = DescriptorWatcher::new(&rx, noop, WatcherContext::default()).unwrap();
        assert!(w.is_valid());
        assert_eq!(w.native_descriptor(), rx.as_raw_descriptor());
        assert_eq!(w.enabled_callbacks(), CallbackFlags::empty());
        assert!(!w.close_on_invalidate());
        assert!(!w.is_attached());
    }

    #[test]
    fn invalid_descriptor_rejected_without_hooks() {
        let (ctx, counters) = counting_context(1);
        let err = unsafe { DescriptorWatcher::from_raw_descriptor(-1, false, noop, ctx) }
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor(-1, _)));
        assert_eq!(counters.retained.load(Ordering::SeqCst), 0);
        assert_eq!(counters.released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unopened_descriptor_rejected() {
        let raw = 1 << 24;
        let err = DescriptorWatcher::new(&base::Descriptor(raw), noop, Default::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDescriptor(fd, _) if fd == raw));
    }

    #[test]
    fn enable_disable_flags() {
        let (rx, _tx) = base::pipe().unwrap();
        let w = DescriptorWatcher::new(&rx, noop, WatcherContext::default()).unwrap();
        w.enable_callbacks(CallbackFlags::READ);
        w.enable_callbacks(CallbackFlags::WRITE);
        assert_eq!(w.enabled_callbacks(), CallbackFlags::all());
        w.disable_callbacks(CallbackFlags::READ);
        assert_eq!(w.enabled_callbacks(), CallbackFlags::WRITE);
    }

    #[test]
    fn invalidate_is_idempotent_and_terminal() {
        let (rx, _tx) = base::pipe().unwrap();
        let (ctx, counters) = counting_context(9);
        let w = DescriptorWatcher::new(&rx, noop, ctx).unwrap();
        w.enable_callbacks(CallbackFlags::READ);
        assert_eq!(counters.retained.load(Ordering::SeqCst), 1);

        w.invalidate();
        w.invalidate();
        assert!(!w.is_valid());
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);

        w.enable_callbacks(CallbackFlags::WRITE);
        w.disable_callbacks(CallbackFlags::READ);
        assert_eq!(w.enabled_callbacks(), CallbackFlags::READ);
        assert_eq!(w.native_descriptor(), rx.as_raw_descriptor());
        assert!(w.context().info().is_none());

        drop(w);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.retained.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_drop_releases_and_closes() {
        let (rx, mut tx) = base::pipe().unwrap();
        let (ctx, counters) = counting_context(2);
        let w = DescriptorWatcher::with_ownership(rx, noop, ctx).unwrap();
        let clone = w.clone();
        drop(w);
        assert!(clone.is_valid());
        tx.write_all(b"x").unwrap();
        drop(clone);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(
            tx.write_all(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn owned_descriptor_closed_on_invalidate() {
        let (rx, mut tx) = base::pipe().unwrap();
        let w = DescriptorWatcher::with_ownership(rx, noop, WatcherContext::default()).unwrap();
        assert!(w.close_on_invalidate());
        w.invalidate();
        assert_eq!(
            tx.write_all(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn borrowed_descriptor_left_open() {
        let (rx, _tx) = base::pipe().unwrap();
        let w = DescriptorWatcher::new(&rx, noop, WatcherContext::default()).unwrap();
        w.invalidate();
        assert!(is_descriptor_open(rx.as_raw_descriptor()));
    }

    #[test]
    fn context_copy_keeps_hooks() {
        let (rx, _tx) = base::pipe().unwrap();
        let (ctx, _counters) = counting_context(11);
        let w = DescriptorWatcher::new(&rx, noop, ctx).unwrap();
        let copy = w.context();
        assert_eq!(copy.info_as::<u32>(), Some(&11));
        assert!(copy.has_retain());
        assert!(copy.has_release());
        assert!(!copy.has_describe());
    }

    #[test]
    fn perform_is_one_shot() {
        let (rx, _tx) = base::pipe().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let w = DescriptorWatcher::new(
            &rx,
            move |_, flags, info| {
                assert_eq!(flags, CallbackFlags::READ);
                assert_eq!(info.and_then(|i| i.downcast_ref::<u32>()), Some(&3));
                c.fetch_add(1, Ordering::SeqCst);
            },
            WatcherContext::new(3u32),
        )
        .unwrap();

        assert!(!w.perform(CallbackFlags::READ));
        w.enable_callbacks(CallbackFlags::all());
        assert!(w.perform(CallbackFlags::READ));
        assert_eq!(w.enabled_callbacks(), CallbackFlags::WRITE);
        assert!(!w.perform(CallbackFlags::READ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_reenable_and_invalidate() {
        let (rx, _tx) = base::pipe().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let w = DescriptorWatcher::new(
            &rx,
            move |w, flags, _| {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    w.enable_callbacks(flags);
                } else {
                    w.invalidate();
                }
            },
            WatcherContext::default(),
        )
        .unwrap();
        w.enable_callbacks(CallbackFlags::READ);
        assert!(w.perform(CallbackFlags::READ));
        assert_eq!(w.enabled_callbacks(), CallbackFlags::READ);
        assert!(w.perform(CallbackFlags::READ));
        assert!(!w.is_valid());
        assert!(!w.perform(CallbackFlags::READ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_from_other_thread() {
        let (rx, _tx) = base::pipe().unwrap();
        let w = DescriptorWatcher::new(&rx, noop, WatcherContext::default()).unwrap();
        let remote = w.clone();
        std::thread::spawn(move || remote.invalidate())
            .join()
            .unwrap();
        assert!(!w.is_valid());
    }

    #[test]
    fn description_uses_context() {
        let (rx, _tx) = base::pipe().unwrap();
        let ctx = WatcherContext::new("stdin-reader").with_describe(|info| {
            format!("<{}>", info.downcast_ref::<&str>().unwrap())
        });
        let w = DescriptorWatcher::new(&rx, noop, ctx).unwrap();
        w.enable_callbacks(CallbackFlags::READ);
        let description = w.describe();
        assert!(description.contains("valid = true"));
        assert!(description.contains(&format!("fd = {}", rx.as_raw_descriptor())));
        assert!(description.contains("<stdin-reader>"));
        assert!(description.contains("borrowed"));
    }
}
