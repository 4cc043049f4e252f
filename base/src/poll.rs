// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::min;
use std::fs::File;
use std::ptr::null_mut;
use std::time::Duration;
use std::time::Instant;

use libc::c_int;
use libc::epoll_create1;
use libc::epoll_ctl;
use libc::epoll_event;
use libc::epoll_wait;
use libc::EPOLLERR;
use libc::EPOLLHUP;
use libc::EPOLLIN;
use libc::EPOLLOUT;
use libc::EPOLLRDHUP;
use libc::EPOLL_CLOEXEC;
use libc::EPOLL_CTL_ADD;
use libc::EPOLL_CTL_DEL;
use libc::EPOLL_CTL_MOD;
use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;

use crate::errno_result;
use crate::AsRawDescriptor;
use crate::Error;
use crate::FromRawDescriptor;
use crate::RawDescriptor;
use crate::Result;

/// Default number of events returned by a single `wait_timeout` call.
pub const EVENT_CONTEXT_MAX_EVENTS: usize = 16;

/// Represents types of events to watch for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    // Used to to temporarily stop waiting for events without removing the associated descriptor
    // from the EventContext. Hangups and errors are still reported.
    None,
    Read,
    Write,
    ReadWrite,
}

impl From<EventType> for u32 {
    fn from(et: EventType) -> u32 {
        let v = match et {
            EventType::None => 0,
            EventType::Read => EPOLLIN | EPOLLRDHUP,
            EventType::Write => EPOLLOUT,
            EventType::ReadWrite => EPOLLIN | EPOLLRDHUP | EPOLLOUT,
        };
        v as u32
    }
}

/// Represents an event that has been signaled and waited for via `EventContext::wait_timeout`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TriggeredEvent {
    pub token: u64,
    pub is_readable: bool,
    pub is_writable: bool,
    /// Peer hangup or an error condition on the descriptor.
    pub is_hungup: bool,
}

/// Used to poll multiple objects that have file descriptors.
///
/// Each descriptor is associated with a `u64` token chosen by the caller. The token is handed back
/// in every `TriggeredEvent` reported for that descriptor.
pub struct EventContext {
    epoll_ctx: File,
    max_events: usize,
}

impl EventContext {
    /// Creates a new `EventContext` reporting at most `EVENT_CONTEXT_MAX_EVENTS` events per wait.
    pub fn new() -> Result<EventContext> {
        Self::with_max_events(EVENT_CONTEXT_MAX_EVENTS)
    }

    /// Creates a new `EventContext` reporting at most `max_events` events per wait. A value of
    /// zero is treated as one.
    pub fn with_max_events(max_events: usize) -> Result<EventContext> {
        // SAFETY: we check the return value.
        let epoll_fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return errno_result();
        }
        Ok(EventContext {
            // SAFETY: epoll_create1 gave us a new descriptor that nothing else owns.
            epoll_ctx: unsafe { File::from_raw_descriptor(epoll_fd) },
            max_events: max_events.clamp(1, c_int::MAX as usize),
        })
    }

    /// Adds the given `descriptor` to this context, watching for the specified events and
    /// associates the given `token` with those events.
    ///
    /// A `descriptor` can only be added once. If it is closed without being deleted, and no
    /// duplicate of it exists, events will not be reported by `wait_timeout` anymore.
    pub fn add_for_event(
        &self,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: u64,
    ) -> Result<()> {
        self.ctl(EPOLL_CTL_ADD, descriptor, event_type, token)
    }

    /// If `descriptor` was previously added to this context, the watched events will be replaced
    /// with `event_type` and the token associated with it will be replaced with the given `token`.
    pub fn modify(
        &self,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: u64,
    ) -> Result<()> {
        self.ctl(EPOLL_CTL_MOD, descriptor, event_type, token)
    }

    /// Deletes the given `descriptor` from this context.
    ///
    /// If a descriptor's token shows up in the list of hangup events, it should be removed using
    /// this method or by closing it. Failure to do so will cause `wait_timeout` to always return
    /// immediately.
    pub fn delete(&self, descriptor: &dyn AsRawDescriptor) -> Result<()> {
        // SAFETY: we give a valid epoll FD and FD to stop watching. Then we check the return value.
        let ret = unsafe {
            epoll_ctl(
                self.epoll_ctx.as_raw_descriptor(),
                EPOLL_CTL_DEL,
                descriptor.as_raw_descriptor(),
                null_mut(),
            )
        };
        if ret < 0 {
            return errno_result();
        };
        Ok(())
    }

    fn ctl(
        &self,
        op: c_int,
        descriptor: &dyn AsRawDescriptor,
        event_type: EventType,
        token: u64,
    ) -> Result<()> {
        let mut evt = epoll_event {
            events: event_type.into(),
            u64: token,
        };
        // SAFETY: we give a valid epoll FD and FD to watch, as well as a valid epoll_event
        // structure. Then we check the return value.
        let ret = unsafe {
            epoll_ctl(
                self.epoll_ctx.as_raw_descriptor(),
                op,
                descriptor.as_raw_descriptor(),
                &mut evt,
            )
        };
        if ret < 0 {
            return errno_result();
        };
        Ok(())
    }

    /// Waits for any events to occur in descriptors that were previously added to this context.
    ///
    /// `None` blocks until an event arrives. The events are level-triggered: any readiness left
    /// unhandled is reported again by the next call.
    ///
    /// A timeout is rounded up to whole milliseconds and measured against a deadline, so a wait
    /// interrupted by a signal resumes with only the time that is left. Timeouts too large to
    /// express are capped at ~24.8 days.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> Result<SmallVec<[TriggeredEvent; 16]>> {
        let deadline = timeout.map(|t| Instant::now().checked_add(t));

        let mut epoll_events = vec![epoll_event { events: 0, u64: 0 }; self.max_events];
        let max_events = epoll_events.len() as c_int;
        let ret = loop {
            let timeout_millis = match deadline {
                None => -1,
                Some(Some(deadline)) => {
                    timeout_to_millis(deadline.saturating_duration_since(Instant::now()))
                }
                Some(None) => c_int::MAX,
            };
            // SAFETY: we give an epoll context and a properly sized epoll_events array pointer,
            // which we trust the kernel to fill in properly.
            let ret = unsafe {
                epoll_wait(
                    self.epoll_ctx.as_raw_descriptor(),
                    epoll_events.as_mut_ptr(),
                    max_events,
                    timeout_millis,
                )
            };
            if ret < 0 && Error::last().errno() == libc::EINTR {
                continue;
            }
            break ret;
        };
        if ret < 0 {
            return errno_result();
        }
        let count = ret as usize;

        let events = epoll_events[0..count]
            .iter()
            .map(|e| {
                let events = e.events;
                TriggeredEvent {
                    token: e.u64,
                    is_readable: events & (EPOLLIN as u32) != 0,
                    is_writable: events & (EPOLLOUT as u32) != 0,
                    is_hungup: events & ((EPOLLHUP | EPOLLRDHUP | EPOLLERR) as u32) != 0,
                }
            })
            .collect();
        Ok(events)
    }
}

/// Whole milliseconds for `epoll_wait`, rounded up so a nonzero timeout never turns into a busy
/// poll.
fn timeout_to_millis(timeout: Duration) -> c_int {
    min(c_int::MAX as u128, timeout.as_nanos().div_ceil(1_000_000)) as c_int
}

impl AsRawDescriptor for EventContext {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.epoll_ctx.as_raw_descriptor()
    }
}
