// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Safe wrappers for the system interfaces used to watch descriptors for readiness.

#[cfg(not(any(target_os = "android", target_os = "linux")))]
compile_error!("Unsupported platform");

#[macro_use]
pub mod handle_eintr;
pub mod descriptor;
mod errno;
mod event;
mod poll;
pub mod syslog;

pub use descriptor::add_fd_flags;
pub use descriptor::clone_descriptor;
pub use descriptor::is_descriptor_open;
pub use descriptor::pipe;
pub use descriptor::validate_raw_descriptor;
pub use descriptor::AsRawDescriptor;
pub use descriptor::Descriptor;
pub use descriptor::FromRawDescriptor;
pub use descriptor::IntoRawDescriptor;
pub use descriptor::RawDescriptor;
pub use descriptor::SafeDescriptor;
pub use errno::errno_result;
pub use errno::Error;
pub use errno::Result;
pub use event::Event;
pub use log::debug;
pub use log::error;
pub use log::info;
pub use log::trace;
pub use log::warn;
pub use poll::EventContext;
pub use poll::EventType;
pub use poll::TriggeredEvent;
pub use poll::EVENT_CONTEXT_MAX_EVENTS;
