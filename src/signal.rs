// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Edge-triggered wakeup channel: a non-blocking AF_UNIX SOCK_DGRAM pair.
// The receiver binds with Linux autobind (an empty `sun_path`, which
// asks the kernel to assign an abstract-namespace name) and publishes the
// assigned address; the sender connects to that address and fires a
// single byte whenever it transitions the FIFO from empty to non-empty
// while EVENT_ARMED is set. Ported from uct_mm_iface_create_signal_fd /
// uct_mm_iface_event_fd_arm's draining loop, using the raw libc bindings
// platform/posix.rs already pulls in.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use crate::error::{Result, TransportError};

/// Abstract-namespace addresses are short; this is generous headroom
/// over the 5 bytes Linux autobind typically assigns.
const MAX_ADDR_LEN: usize = 32;

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn new_dgram_socket() -> io::Result<RawFd> {
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    set_nonblocking(fd)?;
    Ok(fd)
}

/// Receiver-owned half of the wakeup channel.
pub struct SignalSocket {
    fd: RawFd,
}

impl SignalSocket {
    /// Create the socket, bind via Linux autobind, and return the
    /// assigned abstract address to publish in the FIFO control block.
    pub fn create() -> Result<(Self, Vec<u8>)> {
        let fd = new_dgram_socket().map_err(TransportError::Io)?;
        let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        // Zero-length sun_path: Linux assigns an abstract-namespace name.
        let bind_len = mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                bind_len,
            )
        };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        let mut got: libc::sockaddr_un = unsafe { mem::zeroed() };
        let mut got_len = mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                fd,
                &mut got as *mut libc::sockaddr_un as *mut libc::sockaddr,
                &mut got_len,
            )
        };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }

        let path_len = got_len as usize - mem::size_of::<libc::sa_family_t>();
        let path_len = path_len.min(MAX_ADDR_LEN);
        let path_bytes: Vec<u8> = got.sun_path[..path_len]
            .iter()
            .map(|&c| c as u8)
            .collect();

        Ok((SignalSocket { fd }, path_bytes))
    }

    /// Non-blocking drain: consume every pending wakeup datagram. Called
    /// right before re-arming so a wakeup delivered while we were already
    /// polling doesn't leave a stale byte queued for the next `arm`.
    pub fn drain(&self) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::recvfrom(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if n > 0 {
                continue; // got a datagram; keep draining
            }
            if n == 0 {
                // Zero-byte recvfrom: the peer closed (§4.3 step 5).
                return Err(TransportError::ConnectionReset);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(()),
                Some(libc::EINTR) => continue,
                Some(libc::ECONNREFUSED) => return Err(TransportError::ConnectionReset),
                _ => return Err(TransportError::Io(err)),
            }
        }
    }

    /// Like `drain`, but reports whether any datagram was actually
    /// consumed — needed by `arm` to distinguish "nothing pending, go
    /// ahead and sleep" from "a wake-up was already queued".
    pub fn drain_any(&self) -> Result<bool> {
        let mut buf = [0u8; 64];
        let mut drained = false;
        loop {
            let n = unsafe {
                libc::recvfrom(
                    self.fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if n > 0 {
                drained = true;
                continue;
            }
            if n == 0 {
                // Zero-byte recvfrom: the peer closed (§4.3 step 5).
                return Err(TransportError::ConnectionReset);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(drained),
                Some(libc::EINTR) => continue,
                Some(libc::ECONNREFUSED) => return Err(TransportError::ConnectionReset),
                _ => return Err(TransportError::Io(err)),
            }
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for SignalSocket {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}

/// Sender-owned half: connected to the receiver's published address, used
/// only to fire single-byte wakeups.
pub struct SignalSender {
    fd: RawFd,
}

impl SignalSender {
    pub fn connect(addr: &[u8]) -> Result<Self> {
        let fd = new_dgram_socket().map_err(TransportError::Io)?;
        let mut sa: libc::sockaddr_un = unsafe { mem::zeroed() };
        sa.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let len = addr.len().min(sa.sun_path.len());
        for (slot, byte) in sa.sun_path.iter_mut().zip(addr[..len].iter()) {
            *slot = *byte as libc::c_char;
        }
        let total_len =
            (mem::size_of::<libc::sa_family_t>() + len) as libc::socklen_t;
        let ret = unsafe {
            libc::connect(
                fd,
                &sa as *const libc::sockaddr_un as *const libc::sockaddr,
                total_len,
            )
        };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(TransportError::Io(err));
        }
        Ok(SignalSender { fd })
    }

    /// Fire a wakeup. `EAGAIN` (socket buffer full — the peer hasn't
    /// drained yet) is not an error: the peer will still wake because the
    /// data it would have drained is already queued.
    pub fn signal(&self) -> Result<()> {
        let byte = [1u8];
        let ret = unsafe {
            libc::send(
                self.fd,
                byte.as_ptr() as *const libc::c_void,
                byte.len(),
                0,
            )
        };
        if ret >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Ok(()),
            Some(libc::ECONNREFUSED) => Err(TransportError::ConnectionReset),
            _ => Err(TransportError::Io(err)),
        }
    }
}

impl Drop for SignalSender {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd) };
        }
    }
}
