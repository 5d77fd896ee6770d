// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Capability and event flag bitsets reported by a receiver interface's
// `query`, mirroring the flag assembly in uct_mm_iface_query.

use bitflags::bitflags;

bitflags! {
    /// Operations a `SenderEndpoint`/`ReceiverInterface` pair supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const PUT_SHORT              = 1 << 0;
        const PUT_BCOPY              = 1 << 1;
        const GET_BCOPY              = 1 << 2;
        const AM_SHORT               = 1 << 3;
        const AM_BCOPY               = 1 << 4;
        const ATOMIC_CPU             = 1 << 5;
        const PENDING                = 1 << 6;
        const CB_SYNC                = 1 << 7;
        const EVENT_SEND_COMP        = 1 << 8;
        const EVENT_RECV             = 1 << 9;
        const EVENT_FD               = 1 << 10;
        /// Every receiver interface can be connected to directly by
        /// address alone (no separate connection handshake), unconditionally.
        const CONNECT_TO_IFACE       = 1 << 11;
        /// Only set when the segment backing the FIFO can be re-attached
        /// from its file (i.e. the mapper publishes an attachable name).
        const EP_CHECK               = 1 << 12;
        /// Only meaningful together with `EP_CHECK`.
        const ERRHANDLE_PEER_FAILURE = 1 << 13;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::PUT_SHORT
            | Capabilities::PUT_BCOPY
            | Capabilities::GET_BCOPY
            | Capabilities::AM_SHORT
            | Capabilities::AM_BCOPY
            | Capabilities::ATOMIC_CPU
            | Capabilities::PENDING
            | Capabilities::CB_SYNC
            | Capabilities::EVENT_SEND_COMP
            | Capabilities::EVENT_RECV
            | Capabilities::EVENT_FD
            | Capabilities::CONNECT_TO_IFACE
    }
}

/// Latency/overhead/bandwidth estimate returned by `estimate_perf`, with
/// constants taken from uct_mm_estimate_perf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerfEstimate {
    pub send_pre_overhead_ns: f64,
    pub send_post_overhead_ns: f64,
    pub recv_overhead_ns: f64,
    pub latency_ns: f64,
    pub bandwidth_mbps: f64,
    pub max_inflight_eps: u64,
}

impl Default for PerfEstimate {
    fn default() -> Self {
        PerfEstimate {
            send_pre_overhead_ns: 10.0,
            send_post_overhead_ns: 10.0,
            recv_overhead_ns: 10.0,
            latency_ns: 80.0,
            bandwidth_mbps: 6911.0,
            max_inflight_eps: u64::MAX,
        }
    }
}

/// Maximum inline (`am_short`) and bounce-copy (`am_bcopy`) payload sizes,
/// derived from the configured FIFO element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmLimits {
    pub max_short: usize,
    pub max_bcopy: usize,
}
