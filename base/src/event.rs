// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem;

use libc::c_void;

use crate::descriptor::AsRawDescriptor;
use crate::descriptor::FromRawDescriptor;
use crate::descriptor::SafeDescriptor;
use crate::errno_result;
use crate::RawDescriptor;
use crate::Result;

/// A wait/notify mechanism backed by a Linux eventfd (man 2 eventfd). Writes signal the event.
/// Reads block until the event is signaled and then clear the signal.
///
/// An `Event` can be added to an `EventContext` like any other descriptor, which makes it the
/// usual way to break another thread out of `EventContext::wait_timeout`.
#[derive(Debug, PartialEq, Eq)]
pub struct Event {
    event_handle: SafeDescriptor,
}

impl Event {
    /// Creates a new blocking eventfd in the unsignaled state.
    pub fn new() -> Result<Event> {
        // SAFETY: eventfd merely allocates an eventfd for our process and we handle the error case.
        let ret = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if ret < 0 {
            return errno_result();
        }
        Ok(Event {
            // SAFETY: we checked ret for success and know the kernel gave us an fd that we own.
            event_handle: unsafe { SafeDescriptor::from_raw_descriptor(ret) },
        })
    }

    /// Signals the event by adding one to the eventfd's count.
    pub fn signal(&self) -> Result<()> {
        let v: u64 = 1;
        // SAFETY: we made this fd and the pointer we pass can not overflow because we give the
        // syscall's size parameter properly.
        let ret = handle_eintr_errno!(unsafe {
            libc::write(
                self.as_raw_descriptor(),
                &v as *const u64 as *const c_void,
                mem::size_of::<u64>(),
            )
        });
        if ret <= 0 {
            return errno_result();
        }
        Ok(())
    }

    /// Blocks until the eventfd's count is non-zero, then resets the count to zero and returns it.
    ///
    /// If the descriptor was made non-blocking this fails with `EAGAIN` instead of blocking.
    pub fn wait(&self) -> Result<u64> {
        let mut buf: u64 = 0;
        // SAFETY: we made this fd and the pointer we pass can not overflow because we give the
        // syscall's size parameter properly.
        let ret = handle_eintr_errno!(unsafe {
            libc::read(
                self.as_raw_descriptor(),
                &mut buf as *mut u64 as *mut c_void,
                mem::size_of::<u64>(),
            )
        });
        if ret <= 0 {
            return errno_result();
        }
        Ok(buf)
    }
}

impl AsRawDescriptor for Event {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.event_handle.as_raw_descriptor()
    }
}
