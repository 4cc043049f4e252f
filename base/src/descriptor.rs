// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::Stderr;
use std::io::Stdin;
use std::io::Stdout;
use std::mem;
use std::net::TcpListener;
use std::net::TcpStream;
use std::net::UdpSocket;
use std::os::fd::OwnedFd;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::IntoRawFd;
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixDatagram;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;

use crate::errno_result;
use crate::Result;

pub type RawDescriptor = RawFd;

/// Trait for returning the underlying raw descriptor, without giving up ownership of the
/// descriptor.
pub trait AsRawDescriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor;
}

/// Trait for forfeiting ownership of the current raw descriptor, and returning the raw descriptor
pub trait IntoRawDescriptor {
    fn into_raw_descriptor(self) -> RawDescriptor;
}

pub trait FromRawDescriptor {
    /// # Safety
    /// Safe only if the caller ensures nothing has access to the descriptor after passing it to
    /// `from_raw_descriptor`
    unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self;
}

/// Wraps a RawDescriptor and safely closes it when self falls out of scope.
#[derive(Debug, PartialEq, Eq)]
pub struct SafeDescriptor {
    descriptor: RawDescriptor,
}

impl Drop for SafeDescriptor {
    fn drop(&mut self) {
        // SAFETY: we own the descriptor and nothing else will use it after this.
        let _ = unsafe { libc::close(self.descriptor) };
    }
}

impl AsRawDescriptor for SafeDescriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor
    }
}

impl IntoRawDescriptor for SafeDescriptor {
    fn into_raw_descriptor(self) -> RawDescriptor {
        let descriptor = self.descriptor;
        mem::forget(self);
        descriptor
    }
}

impl FromRawDescriptor for SafeDescriptor {
    unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self {
        SafeDescriptor { descriptor }
    }
}

impl AsRawFd for SafeDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.descriptor
    }
}

impl From<File> for SafeDescriptor {
    fn from(f: File) -> SafeDescriptor {
        // SAFETY: we own the File at this point.
        unsafe { SafeDescriptor::from_raw_descriptor(f.into_raw_fd()) }
    }
}

impl From<OwnedFd> for SafeDescriptor {
    fn from(fd: OwnedFd) -> SafeDescriptor {
        // SAFETY: we own the OwnedFd at this point.
        unsafe { SafeDescriptor::from_raw_descriptor(fd.into_raw_fd()) }
    }
}

impl From<SafeDescriptor> for File {
    fn from(s: SafeDescriptor) -> File {
        // SAFETY: we own the SafeDescriptor at this point.
        unsafe { File::from_raw_fd(s.into_raw_descriptor()) }
    }
}

/// For use cases where a simple wrapper around a RawDescriptor is needed.
/// This is a simply a wrapper and does not manage the lifetime of the descriptor.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Descriptor(pub RawDescriptor);

impl AsRawDescriptor for Descriptor {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.0
    }
}

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Returns `true` if `descriptor` names an open file descriptor of this process.
pub fn is_descriptor_open(descriptor: RawDescriptor) -> bool {
    if descriptor < 0 {
        return false;
    }
    // SAFETY: F_GETFD only reads the descriptor flags and we check the return value.
    unsafe { libc::fcntl(descriptor, libc::F_GETFD) != -1 }
}

/// Verifies that `descriptor` is open, returning it unchanged on success.
///
/// Negative descriptors fail with `EBADF` without touching the kernel.
pub fn validate_raw_descriptor(descriptor: RawDescriptor) -> Result<RawDescriptor> {
    if descriptor < 0 {
        return Err(crate::Error::new(libc::EBADF));
    }
    // SAFETY: F_GETFD only reads the descriptor flags and we check the return value.
    let flags = unsafe { libc::fcntl(descriptor, libc::F_GETFD) };
    if flags < 0 {
        errno_result()
    } else {
        Ok(descriptor)
    }
}

/// Clones `descriptor`, returning a new `RawDescriptor` that refers to the same open file
/// description as `descriptor`. The cloned descriptor will have the `FD_CLOEXEC` flag set but will
/// not share any other file descriptor flags with `descriptor`.
pub fn clone_descriptor(descriptor: &dyn AsRawDescriptor) -> Result<RawDescriptor> {
    // SAFETY: this doesn't modify any memory and we check the return value.
    let ret = unsafe { libc::fcntl(descriptor.as_raw_descriptor(), libc::F_DUPFD_CLOEXEC, 0) };
    if ret < 0 {
        errno_result()
    } else {
        Ok(ret)
    }
}

/// Adds the given `flags` to the file status flags of `descriptor`.
pub fn add_fd_flags(descriptor: RawDescriptor, flags: libc::c_int) -> Result<()> {
    // SAFETY: F_GETFL only reads the status flags and we check the return value.
    let start_flags = unsafe { libc::fcntl(descriptor, libc::F_GETFL) };
    if start_flags < 0 {
        return errno_result();
    }
    // SAFETY: F_SETFL only changes the status flags and we check the return value.
    let ret = unsafe { libc::fcntl(descriptor, libc::F_SETFL, start_flags | flags) };
    if ret < 0 {
        return errno_result();
    }
    Ok(())
}

/// Creates a unidirectional pipe, returning `(read_end, write_end)`.
///
/// Both ends have `O_CLOEXEC` set.
pub fn pipe() -> Result<(File, File)> {
    let mut pipe_fds = [-1; 2];
    // SAFETY: pipe2 writes exactly two descriptors into the array and we check the return value.
    let ret = unsafe { libc::pipe2(pipe_fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if ret < 0 {
        return errno_result();
    }
    // SAFETY: both descriptors were just created by pipe2 and are owned by nothing else.
    unsafe {
        Ok((
            File::from_raw_fd(pipe_fds[0]),
            File::from_raw_fd(pipe_fds[1]),
        ))
    }
}

macro_rules! AsRawDescriptor {
    ($name:ident) => {
        impl AsRawDescriptor for $name {
            fn as_raw_descriptor(&self) -> RawDescriptor {
                self.as_raw_fd()
            }
        }
    };
}

macro_rules! FromRawDescriptor {
    ($name:ident) => {
        impl FromRawDescriptor for $name {
            unsafe fn from_raw_descriptor(descriptor: RawDescriptor) -> Self {
                $name::from_raw_fd(descriptor)
            }
        }
    };
}

macro_rules! IntoRawDescriptor {
    ($name:ident) => {
        impl IntoRawDescriptor for $name {
            fn into_raw_descriptor(self) -> RawDescriptor {
                self.into_raw_fd()
            }
        }
    };
}

AsRawDescriptor!(File);
AsRawDescriptor!(OwnedFd);
AsRawDescriptor!(TcpListener);
AsRawDescriptor!(TcpStream);
AsRawDescriptor!(UdpSocket);
AsRawDescriptor!(UnixDatagram);
AsRawDescriptor!(UnixListener);
AsRawDescriptor!(UnixStream);
AsRawDescriptor!(Stdin);
AsRawDescriptor!(Stdout);
AsRawDescriptor!(Stderr);
FromRawDescriptor!(File);
FromRawDescriptor!(OwnedFd);
FromRawDescriptor!(UnixStream);
FromRawDescriptor!(UnixDatagram);
IntoRawDescriptor!(File);
IntoRawDescriptor!(OwnedFd);
IntoRawDescriptor!(TcpListener);
IntoRawDescriptor!(TcpStream);
IntoRawDescriptor!(UdpSocket);
IntoRawDescriptor!(UnixDatagram);
IntoRawDescriptor!(UnixListener);
IntoRawDescriptor!(UnixStream);

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::io::Write;

    use super::*;

    #[test]
    fn negative_descriptor_is_invalid() {
        assert_eq!(
            validate_raw_descriptor(-1),
            Err(crate::Error::new(libc::EBADF))
        );
        assert!(!is_descriptor_open(-5));
    }

    #[test]
    fn open_descriptor_is_valid() {
        let (rx, _tx) = pipe().unwrap();
        let raw = rx.as_raw_descriptor();
        assert_eq!(validate_raw_descriptor(raw), Ok(raw));
        assert!(is_descriptor_open(raw));
        assert_eq!(
            validate_raw_descriptor(1 << 24),
            Err(crate::Error::new(libc::EBADF))
        );
    }

    #[test]
    fn safe_descriptor_closes_on_drop() {
        let (rx, mut tx) = pipe().unwrap();
        let safe = SafeDescriptor::from(rx);
        tx.write_all(b"x").unwrap();
        drop(safe);
        // Writing with no read end left fails instead of raising SIGPIPE, which Rust ignores.
        assert_eq!(
            tx.write_all(b"x").unwrap_err().kind(),
            std::io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn clone_shares_pipe() {
        let (rx, tx) = pipe().unwrap();
        let raw = clone_descriptor(&tx).unwrap();
        drop(tx);
        // SAFETY: `raw` was just duplicated and is owned by nothing else.
        let tx_clone: File = unsafe { SafeDescriptor::from_raw_descriptor(raw) }.into();
        (&tx_clone).write_all(b"hi").unwrap();
        drop(tx_clone);
        let mut buf = [0u8; 2];
        (&rx).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }
}
