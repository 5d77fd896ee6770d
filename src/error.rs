// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Closed set of error kinds a caller of this transport can observe (mirrors
// mm_iface.c's UCS_ERR_* return values used on this code path).

use std::io;

/// Every outcome a transport-level operation can return besides success.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// Configuration violates an invariant (non-power-of-two FIFO size,
    /// release factor out of range, element size too small, multi-threaded
    /// worker, ...).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The FIFO is full or the descriptor pool is exhausted. The caller
    /// should place the send on the pending arbiter and retry on the next
    /// progress call.
    #[error("no resources available")]
    NoResources,

    /// `arm` could not be completed because new data or a pending send
    /// arrived; the caller must keep polling instead of sleeping.
    #[error("busy")]
    Busy,

    /// The signal socket reported that its peer went away (zero-byte
    /// `recvfrom`).
    #[error("connection reset")]
    ConnectionReset,

    /// The requested operation is not supported by this transport (e.g.
    /// flush with a completion handle).
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// An OS-level error unrelated to `EAGAIN`/`EINTR` on the signal
    /// socket or shared-memory syscalls.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
