// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Readiness primitives a `RunLoop` waits on.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use base::add_fd_flags;
use base::warn;
use base::AsRawDescriptor;
use base::Descriptor;
use base::Event;
use base::EventContext;
use base::EventType;
use base::RawDescriptor;
use base::TriggeredEvent;
use smallvec::SmallVec;

use crate::sync::Condvar;
use crate::sync::Mutex;
use crate::CallbackFlags;

/// Token reserved for the wake event of an `EpollPoller`.
const WAKE_TOKEN: u64 = u64::MAX;

pub type PollEvents = SmallVec<[TriggeredEvent; 16]>;

/// Waits for readiness on a set of descriptors.
///
/// Descriptors are registered with a non-empty interest and a token; `poll` reports readiness as
/// `TriggeredEvent`s carrying that token. Implementations must allow `wake` to be called from any
/// thread while another thread is blocked in `poll`.
pub trait Poller: Send + Sync {
    /// Starts watching `descriptor` for `interest`, reporting readiness under `token`.
    fn register(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()>;

    /// Replaces the interest and token of an already registered `descriptor`.
    fn reregister(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()>;

    /// Stops watching `descriptor`.
    fn deregister(&self, descriptor: RawDescriptor) -> base::Result<()>;

    /// Blocks until at least one registered descriptor is ready, `wake` is called or `timeout`
    /// elapses. `None` waits indefinitely.
    fn poll(&self, timeout: Option<Duration>) -> base::Result<PollEvents>;

    /// Makes a concurrent or the next `poll` return early.
    fn wake(&self) -> base::Result<()>;
}

impl<P: Poller + ?Sized> Poller for Arc<P> {
    fn register(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()> {
        (**self).register(descriptor, interest, token)
    }

    fn reregister(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()> {
        (**self).reregister(descriptor, interest, token)
    }

    fn deregister(&self, descriptor: RawDescriptor) -> base::Result<()> {
        (**self).deregister(descriptor)
    }

    fn poll(&self, timeout: Option<Duration>) -> base::Result<PollEvents> {
        (**self).poll(timeout)
    }

    fn wake(&self) -> base::Result<()> {
        (**self).wake()
    }
}

/// `Poller` backed by epoll.
pub struct EpollPoller {
    ctx: EventContext,
    wake_event: Event,
}

impl EpollPoller {
    pub fn new() -> base::Result<EpollPoller> {
        Self::with_max_events(base::EVENT_CONTEXT_MAX_EVENTS)
    }

    /// Creates a poller returning at most `max_events` readiness reports per `poll`.
    pub fn with_max_events(max_events: usize) -> base::Result<EpollPoller> {
        let ctx = EventContext::with_max_events(max_events)?;
        let wake_event = Event::new()?;
        add_fd_flags(wake_event.as_raw_descriptor(), libc::O_NONBLOCK)?;
        ctx.add_for_event(&wake_event, EventType::Read, WAKE_TOKEN)?;
        Ok(EpollPoller { ctx, wake_event })
    }

    fn clear_wake_event(&self) {
        match self.wake_event.wait() {
            Ok(_) => {}
            Err(e) if e.errno() == libc::EAGAIN => {}
            Err(e) => warn!("failed to clear the poller wake event: {}", e),
        }
    }
}

impl Poller for EpollPoller {
    fn register(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()> {
        self.ctx
            .add_for_event(&Descriptor(descriptor), interest.into(), token)
    }

    fn reregister(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()> {
        self.ctx.modify(&Descriptor(descriptor), interest.into(), token)
    }

    fn deregister(&self, descriptor: RawDescriptor) -> base::Result<()> {
        self.ctx.delete(&Descriptor(descriptor))
    }

    fn poll(&self, timeout: Option<Duration>) -> base::Result<PollEvents> {
        let mut events = self.ctx.wait_timeout(timeout)?;
        if events.iter().any(|e| e.token == WAKE_TOKEN) {
            self.clear_wake_event();
            events.retain(|e| e.token != WAKE_TOKEN);
        }
        Ok(events)
    }

    fn wake(&self) -> base::Result<()> {
        self.wake_event.signal()
    }
}

#[derive(Copy, Clone, Debug)]
struct PendingEdge {
    descriptor: RawDescriptor,
    ready: CallbackFlags,
    hungup: bool,
}

#[derive(Default)]
struct FakeState {
    registered: BTreeMap<RawDescriptor, (u64, CallbackFlags)>,
    // Descriptors `register` fails for, like epoll does for regular files.
    refused: BTreeSet<RawDescriptor>,
    pending: Vec<PendingEdge>,
    woken: bool,
}

/// A `Poller` whose readiness is injected by the caller.
///
/// Every `push_ready` or `push_hangup` call is one readiness edge. An edge is reported by the next
/// `poll` only if its descriptor is registered with a matching interest at that moment, otherwise
/// it is dropped. Descriptors are never touched, so any number may be used.
#[derive(Default)]
pub struct FakePoller {
    state: Mutex<FakeState>,
    cond: Condvar,
}

impl FakePoller {
    pub fn new() -> FakePoller {
        Default::default()
    }

    /// Queues a readiness edge for `descriptor`.
    pub fn push_ready(&self, descriptor: RawDescriptor, ready: CallbackFlags) {
        self.push(PendingEdge {
            descriptor,
            ready,
            hungup: false,
        });
    }

    /// Queues a hangup for `descriptor`, reported regardless of the registered interest.
    pub fn push_hangup(&self, descriptor: RawDescriptor) {
        self.push(PendingEdge {
            descriptor,
            ready: CallbackFlags::empty(),
            hungup: true,
        });
    }

    fn push(&self, edge: PendingEdge) {
        self.state.lock().pending.push(edge);
        self.cond.notify_all();
    }

    /// Returns the interest `descriptor` is registered with, or `None` if it isn't registered.
    pub fn interest(&self, descriptor: RawDescriptor) -> Option<CallbackFlags> {
        self.state
            .lock()
            .registered
            .get(&descriptor)
            .map(|(_, interest)| *interest)
    }

    /// Number of registered descriptors.
    pub fn registered_count(&self) -> usize {
        self.state.lock().registered.len()
    }

    /// Makes every later `register` of `descriptor` fail with `EPERM`.
    pub fn refuse(&self, descriptor: RawDescriptor) {
        self.state.lock().refused.insert(descriptor);
    }
}

impl Poller for FakePoller {
    fn register(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()> {
        let mut state = self.state.lock();
        if state.refused.contains(&descriptor) {
            return Err(base::Error::new(libc::EPERM));
        }
        if state.registered.contains_key(&descriptor) {
            return Err(base::Error::new(libc::EEXIST));
        }
        state.registered.insert(descriptor, (token, interest));
        Ok(())
    }

    fn reregister(
        &self,
        descriptor: RawDescriptor,
        interest: CallbackFlags,
        token: u64,
    ) -> base::Result<()> {
        match self.state.lock().registered.get_mut(&descriptor) {
            Some(entry) => {
                *entry = (token, interest);
                Ok(())
            }
            None => Err(base::Error::new(libc::ENOENT)),
        }
    }

    fn deregister(&self, descriptor: RawDescriptor) -> base::Result<()> {
        match self.state.lock().registered.remove(&descriptor) {
            Some(_) => Ok(()),
            None => Err(base::Error::new(libc::ENOENT)),
        }
    }

    fn poll(&self, timeout: Option<Duration>) -> base::Result<PollEvents> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while state.pending.is_empty() && !state.woken {
            match deadline {
                None => state = self.cond.wait(state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (guard, _) = self.cond.wait_timeout(state, deadline - now);
                    state = guard;
                }
            }
        }
        state.woken = false;

        let pending = std::mem::take(&mut state.pending);
        let mut events = PollEvents::new();
        for edge in pending {
            let Some(&(token, interest)) = state.registered.get(&edge.descriptor) else {
                continue;
            };
            let ready = edge.ready & interest;
            if ready.is_empty() && !edge.hungup {
                continue;
            }
            events.push(TriggeredEvent {
                token,
                is_readable: ready.contains(CallbackFlags::READ),
                is_writable: ready.contains(CallbackFlags::WRITE),
                is_hungup: edge.hungup,
            });
        }
        Ok(events)
    }

    fn wake(&self) -> base::Result<()> {
        self.state.lock().woken = true;
        self.cond.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::thread;

    use super::*;

    #[test]
    fn epoll_reports_registered_token() {
        let poller = EpollPoller::new().unwrap();
        let (rx, mut tx) = base::pipe().unwrap();
        poller
            .register(rx.as_raw_descriptor(), CallbackFlags::READ, 4)
            .unwrap();
        tx.write_all(b"a").unwrap();
        let events = poller.poll(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 4);
        assert!(events[0].is_readable);

        poller.deregister(rx.as_raw_descriptor()).unwrap();
        assert!(poller
            .poll(Some(Duration::from_millis(0)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn epoll_wake_interrupts_blocking_poll() {
        let poller = Arc::new(EpollPoller::new().unwrap());
        let waker = poller.clone();
        let t = thread::spawn(move || waker.wake().unwrap());
        let events = poller.poll(None).unwrap();
        assert!(events.is_empty());
        t.join().unwrap();
        // The wake was consumed.
        assert!(poller
            .poll(Some(Duration::from_millis(0)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn epoll_rejects_double_register() {
        let poller = EpollPoller::new().unwrap();
        let (rx, _tx) = base::pipe().unwrap();
        let fd = rx.as_raw_descriptor();
        poller.register(fd, CallbackFlags::READ, 1).unwrap();
        assert_eq!(
            poller.register(fd, CallbackFlags::READ, 2),
            Err(base::Error::new(libc::EEXIST))
        );
    }

    #[test]
    fn fake_filters_by_interest() {
        let poller = FakePoller::new();
        poller.register(7, CallbackFlags::READ, 1).unwrap();
        poller.push_ready(7, CallbackFlags::WRITE);
        poller.push_ready(8, CallbackFlags::READ);
        assert!(poller
            .poll(Some(Duration::from_millis(0)))
            .unwrap()
            .is_empty());

        poller.push_ready(7, CallbackFlags::all());
        let events = poller.poll(Some(Duration::from_millis(0))).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_readable);
        assert!(!events[0].is_writable);
    }

    #[test]
    fn fake_tracks_registration() {
        let poller = FakePoller::new();
        poller.register(3, CallbackFlags::WRITE, 0).unwrap();
        assert_eq!(poller.interest(3), Some(CallbackFlags::WRITE));
        poller.reregister(3, CallbackFlags::all(), 0).unwrap();
        assert_eq!(poller.interest(3), Some(CallbackFlags::all()));
        poller.deregister(3).unwrap();
        assert_eq!(poller.interest(3), None);
        assert_eq!(poller.registered_count(), 0);
        assert!(poller.deregister(3).is_err());
    }

    #[test]
    fn fake_refused_descriptor() {
        let poller = FakePoller::new();
        poller.refuse(5);
        assert_eq!(
            poller.register(5, CallbackFlags::READ, 0),
            Err(base::Error::new(libc::EPERM))
        );
        assert_eq!(poller.registered_count(), 0);
        poller.register(6, CallbackFlags::READ, 1).unwrap();
    }

    #[test]
    fn fake_wake_from_other_thread() {
        let poller = Arc::new(FakePoller::new());
        let waker = poller.clone();
        let t = thread::spawn(move || waker.wake().unwrap());
        assert!(poller.poll(None).unwrap().is_empty());
        t.join().unwrap();
    }
}
