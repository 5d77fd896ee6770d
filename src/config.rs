// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Construction-time configuration, validated the way uct_mm_iface_t's
// constructor validates uct_mm_iface_config_t before committing to any
// shared-memory allocation. Field names and defaults mirror §6.2's table
// (FIFO_SIZE, FIFO_ELEM_SIZE, SEG_SIZE, FIFO_RELEASE_FACTOR, FIFO_MAX_POLL,
// FIFO_HUGETLB, ERROR_HANDLING, SEND_OVERHEAD, RECV_OVERHEAD, BW) rather than
// the original's env-parsed strings, per this crate's own config layer (see
// SPEC_FULL.md's "Configuration" section).

use crate::caps::PerfEstimate;
use crate::error::{Result, TransportError};

/// Hugetlbfs allocation policy for a segment, matching the `FIFO_HUGETLB`
/// config entry's three-way enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HugetlbPolicy {
    /// Never request huge pages.
    #[default]
    No,
    /// Request huge pages, silently fall back to a normal mapping if the
    /// platform or mapper cannot honor it.
    Try,
    /// Require huge pages; fail construction if they are unavailable.
    Yes,
}

/// Tunables for one `ReceiverInterface`. Defaults mirror §6.2's table.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `FIFO_SIZE`: number of elements in the FIFO ring. Power of two, >= 2.
    pub fifo_size: u32,
    /// `FIFO_ELEM_SIZE`: bytes per FIFO element, including the element
    /// header. Must exceed the header size.
    pub elem_size: usize,
    /// `SEG_SIZE`: bounce-buffer payload capacity for `am_bcopy`, i.e. the
    /// usable bytes in each receive-descriptor-pool slot (excluding
    /// `rx_headroom`).
    pub seg_size: usize,
    /// `FIFO_RELEASE_FACTOR`: fraction of the FIFO, in `[0, 1)`, that must
    /// be consumed before the tail cursor is republished.
    pub release_factor: f64,
    /// `FIFO_MAX_POLL`: upper bound of the adaptive polling window.
    pub fifo_max_poll: u32,
    /// `FIFO_HUGETLB`: hugepage policy for the FIFO segment.
    pub fifo_hugetlb: HugetlbPolicy,
    /// Hugepage policy for receive-descriptor pool chunks; not separately
    /// named in §6.2 but governed by the same `FIFO_HUGETLB` knob there.
    pub rx_hugetlb: HugetlbPolicy,
    /// User-reserved bytes before each descriptor's payload area, for
    /// upper-layer metadata (the "headroom" of §3/§4.4). Not in §6.2's
    /// table but required by the data model; defaults to 0.
    pub rx_headroom: usize,
    /// Number of descriptor-pool slots allocated per growth chunk.
    pub rx_descs_per_chunk: usize,
    /// Number of descriptor-pool chunks pre-allocated at construction.
    pub rx_headroom_chunks: usize,
    /// `ERROR_HANDLING`: advertise `ERRHANDLE_PEER_FAILURE` (only takes
    /// effect when the mapper also supports re-attaching by segment id).
    pub error_handling: bool,
    /// `SEND_OVERHEAD.am_short` (nanoseconds).
    pub send_overhead_am_short_ns: f64,
    /// `SEND_OVERHEAD.am_bcopy` (nanoseconds).
    pub send_overhead_am_bcopy_ns: f64,
    /// `RECV_OVERHEAD.am_short` (nanoseconds).
    pub recv_overhead_am_short_ns: f64,
    /// `RECV_OVERHEAD.am_bcopy` (nanoseconds).
    pub recv_overhead_am_bcopy_ns: f64,
    /// `BW`: advertised dedicated bandwidth, in MB/s.
    pub bandwidth_mbps: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fifo_size: 256,
            elem_size: 128,
            seg_size: 8256,
            release_factor: 0.5,
            fifo_max_poll: 16,
            fifo_hugetlb: HugetlbPolicy::No,
            rx_hugetlb: HugetlbPolicy::No,
            rx_headroom: 0,
            rx_descs_per_chunk: 32,
            rx_headroom_chunks: 1,
            error_handling: false,
            send_overhead_am_short_ns: 10.0,
            send_overhead_am_bcopy_ns: 10.0,
            recv_overhead_am_short_ns: 10.0,
            recv_overhead_am_bcopy_ns: 10.0,
            bandwidth_mbps: 15360.0,
        }
    }
}

/// Smallest possible element header: owner-bit flags word plus a length
/// field. `fifo.rs` defines the precise repr(C) layout; this is only the
/// lower bound used to validate `elem_size`.
pub const MIN_ELEM_HEADER: usize = 32;

/// Fixed base latency added to every perf estimate (§4.3 "Perf estimate").
pub const BASE_LATENCY_NS: f64 = 80.0;

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.fifo_size < 2 || !self.fifo_size.is_power_of_two() {
            return Err(TransportError::InvalidParam(format!(
                "fifo_size must be a power of two >= 2, got {}",
                self.fifo_size
            )));
        }
        if self.fifo_max_poll < 1 {
            return Err(TransportError::InvalidParam(
                "fifo_max_poll must be >= 1".into(),
            ));
        }
        if self.elem_size <= MIN_ELEM_HEADER {
            return Err(TransportError::InvalidParam(format!(
                "elem_size must exceed the element header size ({MIN_ELEM_HEADER}), got {}",
                self.elem_size
            )));
        }
        if !(0.0..1.0).contains(&self.release_factor) {
            return Err(TransportError::InvalidParam(format!(
                "release_factor must be in [0, 1), got {}",
                self.release_factor
            )));
        }
        if self.rx_descs_per_chunk == 0 {
            return Err(TransportError::InvalidParam(
                "rx_descs_per_chunk must be >= 1".into(),
            ));
        }
        if self.seg_size == 0 {
            return Err(TransportError::InvalidParam(
                "seg_size must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Minimum polling window width, `MIN_POLL` in the original AIMD
    /// controller. Fixed, not configurable, matching the source constant.
    pub const MIN_POLL: u32 = 8;

    /// Derive the tail-release throttle mask from `release_factor`: tail is
    /// republished only when `read_index & mask == 0`. `release_factor`
    /// selects the republication *period* as a fraction of `fifo_size`; the
    /// period is rounded up to the nearest power of two so the mask test
    /// remains a cheap bitwise AND (§5 "Batched tail release").
    pub fn release_factor_mask(&self) -> u32 {
        let period = ((self.fifo_size as f64) * self.release_factor) as u32;
        period.max(1).next_power_of_two() - 1
    }

    /// Total bytes needed per descriptor-pool slot: user headroom plus the
    /// usable payload area (§4.4).
    pub fn desc_slot_size(&self) -> usize {
        self.rx_headroom + self.seg_size
    }

    pub fn perf_estimate(&self) -> PerfEstimate {
        PerfEstimate {
            send_pre_overhead_ns: self.send_overhead_am_short_ns,
            send_post_overhead_ns: self.send_overhead_am_bcopy_ns,
            recv_overhead_ns: self.recv_overhead_am_short_ns,
            latency_ns: BASE_LATENCY_NS,
            bandwidth_mbps: self.bandwidth_mbps,
            max_inflight_eps: u64::MAX,
        }
    }
}
