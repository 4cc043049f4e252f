// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use base::EventType;
use base::TriggeredEvent;
use bitflags::bitflags;

bitflags! {
    /// Readiness conditions a watcher can be called back for.
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[repr(transparent)]
    pub struct CallbackFlags: u32 {
        /// The descriptor can be read without blocking, or the peer hung up.
        const READ = 1;
        /// The descriptor can be written without blocking.
        const WRITE = 1 << 1;
    }
}

impl CallbackFlags {
    /// Flags a poll result satisfies. Hangups and errors satisfy both, so a reader sees EOF and a
    /// writer sees the failing write.
    pub fn from_triggered(event: &TriggeredEvent) -> CallbackFlags {
        let mut flags = CallbackFlags::empty();
        if event.is_readable || event.is_hungup {
            flags |= CallbackFlags::READ;
        }
        if event.is_writable || event.is_hungup {
            flags |= CallbackFlags::WRITE;
        }
        flags
    }
}

impl From<CallbackFlags> for EventType {
    fn from(flags: CallbackFlags) -> EventType {
        match (
            flags.contains(CallbackFlags::READ),
            flags.contains(CallbackFlags::WRITE),
        ) {
            (false, false) => EventType::None,
            (true, false) => EventType::Read,
            (false, true) => EventType::Write,
            (true, true) => EventType::ReadWrite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered(is_readable: bool, is_writable: bool, is_hungup: bool) -> TriggeredEvent {
        TriggeredEvent {
            token: 0,
            is_readable,
            is_writable,
            is_hungup,
        }
    }

    #[test]
    fn event_type_conversion() {
        assert_eq!(EventType::from(CallbackFlags::empty()), EventType::None);
        assert_eq!(EventType::from(CallbackFlags::READ), EventType::Read);
        assert_eq!(EventType::from(CallbackFlags::WRITE), EventType::Write);
        assert_eq!(EventType::from(CallbackFlags::all()), EventType::ReadWrite);
    }

    #[test]
    fn hangup_satisfies_both() {
        assert_eq!(
            CallbackFlags::from_triggered(&triggered(false, false, true)),
            CallbackFlags::all()
        );
        assert_eq!(
            CallbackFlags::from_triggered(&triggered(true, false, false)),
            CallbackFlags::READ
        );
        assert_eq!(
            CallbackFlags::from_triggered(&triggered(false, true, false)),
            CallbackFlags::WRITE
        );
    }
}
