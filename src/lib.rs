// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory, single-producer/single-consumer, lock-free signaled
// ring-FIFO active-message transport. Generalizes cpp-ipc's named shared
// memory and synchronization primitives into the uct_mm-style transport
// described in this crate's design notes: a cache-line-aligned control
// block with an owner-bit ring FIFO, edge-triggered wake-up over a unix
// datagram socket, a receive descriptor pool for non-inline payloads, and
// the interface/endpoint split a worker drives via `progress`/`arm`.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod spin_lock;

pub mod error;
pub use error::{Result, TransportError};

pub mod config;
pub use config::{Config, HugetlbPolicy};

pub mod caps;
pub use caps::{AmLimits, Capabilities, PerfEstimate};

pub mod address;
pub use address::InterfaceAddress;

pub mod segment_mapper;
pub use segment_mapper::{MappedSegment, PosixSegmentMapper, SegId, Segment, SegmentMapper};

mod fifo;
mod desc_pool;
mod signal;
mod poll;

mod arbiter;
pub use arbiter::PendingOp;

pub mod endpoint;
pub use endpoint::SenderEndpoint;

pub mod iface;
pub use iface::{AmDisposition, ArmRequest, ReceiverInterface, ReleaseToken};
