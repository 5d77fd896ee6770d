// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Receiver interface: owns the local FIFO, the private read cursor, the
// descriptor pool, the signal socket, and the adaptive-poll controller.
// Exposes the progress entry point a host worker calls in a loop, plus
// the surrounding transport surface (query/flush/fence/address/arm).
// Generalizes uct_mm_iface_t (mm_iface.c) and its progress/arm/query
// methods to this crate's Fifo/DescriptorPool/AdaptivePoll primitives.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::address::InterfaceAddress;
use crate::arbiter::{Arbiter, PendingOp};
use crate::caps::{AmLimits, Capabilities, PerfEstimate};
use crate::config::Config;
use crate::desc_pool::{DescriptorPool, RecvDescriptor};
use crate::endpoint::SenderEndpoint;
use crate::error::{Result, TransportError};
use crate::fifo::{ElemPayload, FifoSegment};
use crate::poll::AdaptivePoll;
use crate::segment_mapper::{SegId, SegmentMapper};
use crate::signal::SignalSocket;

/// What an AM callback decides about the buffer it was just handed.
/// Only meaningful for non-inline (descriptor-backed) receives — an
/// inline payload lives inside the FIFO element itself and is gone the
/// instant `progress` moves on, so `Keep` on an inline element is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmDisposition {
    /// The callback is done with the buffer; the descriptor is returned
    /// to the pool (or, for inline payloads, simply forgotten).
    Consumed,
    /// The callback wants to keep the buffer past this call. `progress`
    /// installs a fresh descriptor into the FIFO slot and hands the
    /// caller a `ReleaseToken` wrapping the retained one.
    Keep,
}

/// Ownership of a retained receive buffer, handed back out of `progress`
/// when an AM callback returns `AmDisposition::Keep`. Dropping it (or
/// calling `release` explicitly) returns the underlying descriptor to
/// the pool it came from.
pub struct ReleaseToken {
    pool: Rc<RefCell<DescriptorPool>>,
    desc: Option<RecvDescriptor>,
    /// Bytes actually written by the sender, not the descriptor's full
    /// capacity — `desc.seg_size` is the slot size, which is almost
    /// always larger than what any one send used.
    len: u32,
}

impl ReleaseToken {
    /// View of the retained payload bytes. Valid until the token is
    /// released or dropped.
    pub fn payload(&self) -> &[u8] {
        let desc = self.desc.as_ref().expect("payload called after release");
        let pool = self.pool.borrow();
        let ptr = pool.payload_ptr(desc);
        unsafe { std::slice::from_raw_parts(ptr, self.len as usize) }
    }

    /// Return the descriptor to the pool. Equivalent to letting the
    /// token drop, spelled out for callers that want the release to
    /// happen at a specific point.
    pub fn release(mut self) {
        if let Some(desc) = self.desc.take() {
            self.pool.borrow_mut().release(desc);
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if let Some(desc) = self.desc.take() {
            self.pool.borrow_mut().release(desc);
        }
    }
}

/// Requested wakeup classes for `arm`, mirroring `event_fd_arm(events)`'s
/// `events` bitmask in spirit (split into two explicit booleans since
/// this transport only ever recognizes these two).
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmRequest {
    pub send_comp: bool,
    pub recv: bool,
}

/// Owns a receiver's shared-memory FIFO and everything needed to drive
/// it: descriptor pool, signal socket, adaptive polling window, and the
/// pending-send arbiter shared with every `SenderEndpoint` this
/// interface creates. Not `Send`/`Sync` (holds `Rc`s) — combined with
/// the explicit `worker_single_threaded` check at construction, this
/// enforces the single-consumer-per-interface invariant both at compile
/// time and for the one boundary case (a caller that insists on sharing
/// the handle some other way) that the type system alone can't catch.
pub struct ReceiverInterface {
    mapper: Arc<dyn SegmentMapper>,
    fifo: Rc<FifoSegment>,
    fifo_seg_id: SegId,
    signal: SignalSocket,
    pool: Rc<RefCell<DescriptorPool>>,
    arbiter: Rc<RefCell<Arbiter>>,
    window: AdaptivePoll,
    cfg: Config,
    am_limits: AmLimits,
    capabilities: Capabilities,
    read_index: u64,
    /// Descriptor currently assigned to each FIFO slot, mirrored here so
    /// `progress` can hand its payload pointer to the AM callback and
    /// release it back to the pool without re-deriving it from the FIFO
    /// element's (untrusted, sender-writable) fields.
    slot_descs: Vec<RecvDescriptor>,
}

impl ReceiverInterface {
    pub fn new(
        cfg: Config,
        mapper: Arc<dyn SegmentMapper>,
        worker_single_threaded: bool,
    ) -> Result<Self> {
        if !worker_single_threaded {
            return Err(TransportError::InvalidParam(
                "this interface requires a single-threaded worker".into(),
            ));
        }
        cfg.validate()?;

        let (fifo_seg_id, fifo) = FifoSegment::create(&*mapper, &cfg)?;
        let fifo = Rc::new(fifo);

        let (signal, signal_addr) = SignalSocket::create()?;
        fifo.publish_signal_addr(&signal_addr);

        let pool = DescriptorPool::new(
            mapper.clone(),
            cfg.rx_headroom,
            cfg.seg_size,
            cfg.rx_descs_per_chunk,
            cfg.rx_headroom_chunks,
            cfg.rx_hugetlb,
        )?;
        let pool = Rc::new(RefCell::new(pool));

        let fifo_size = cfg.fifo_size as usize;
        let mut slot_descs = Vec::with_capacity(fifo_size);
        for i in 0..fifo_size as u64 {
            let desc = pool.borrow_mut().acquire()?;
            fifo.assign_descriptor(i, desc.seg_id, desc.offset, desc.seg_size);
            slot_descs.push(desc);
        }

        let am_limits = AmLimits {
            max_short: fifo.elem_capacity(),
            max_bcopy: cfg.seg_size,
        };

        let mut capabilities = Capabilities::default();
        if mapper.supports_reattach() {
            capabilities |= Capabilities::EP_CHECK;
            if cfg.error_handling {
                capabilities |= Capabilities::ERRHANDLE_PEER_FAILURE;
            }
        }

        let window = AdaptivePoll::new(Config::MIN_POLL, cfg.fifo_max_poll);

        Ok(ReceiverInterface {
            mapper,
            fifo,
            fifo_seg_id,
            signal,
            pool,
            arbiter: Rc::new(RefCell::new(Arbiter::new())),
            window,
            cfg,
            am_limits,
            capabilities,
            read_index: 0,
            slot_descs,
        })
    }

    fn fifo_mask(&self) -> u64 {
        self.cfg.fifo_size as u64 - 1
    }

    /// Poll up to the current adaptive window's worth of FIFO elements,
    /// dispatching each to `am_handler`, then dispatch the pending-send
    /// arbiter. Returns the number of elements consumed. Any descriptor
    /// an AM callback retains (`AmDisposition::Keep`) is appended to
    /// `retained` as a `ReleaseToken` the caller is responsible for
    /// eventually releasing.
    pub fn progress(
        &mut self,
        am_handler: &mut dyn FnMut(u8, &[u8]) -> AmDisposition,
        retained: &mut Vec<ReleaseToken>,
    ) -> Result<u32> {
        let window = self.window.window();
        let mut count = 0u32;
        while count < window {
            if !self.fifo.has_new_data(self.read_index) {
                break;
            }
            match self.fifo.read_elem(self.read_index) {
                Some(ElemPayload::Inline { am_id, data }) => {
                    am_handler(am_id, data);
                }
                Some(ElemPayload::Descriptor { am_id, seg_size, .. }) => {
                    let slot = (self.read_index & self.fifo_mask()) as usize;
                    let desc = self.slot_descs[slot];
                    let data = if desc.is_neutral() {
                        &[][..]
                    } else {
                        let pool = self.pool.borrow();
                        let ptr = pool.payload_ptr(&desc);
                        unsafe { std::slice::from_raw_parts(ptr, seg_size as usize) }
                    };
                    let disposition = am_handler(am_id, data);
                    if disposition == AmDisposition::Keep && !desc.is_neutral() {
                        let fresh = self.pool.borrow_mut().acquire()?;
                        self.fifo
                            .assign_descriptor(self.read_index, fresh.seg_id, fresh.offset, fresh.seg_size);
                        self.slot_descs[slot] = fresh;
                        retained.push(ReleaseToken {
                            pool: self.pool.clone(),
                            desc: Some(desc),
                            len: seg_size,
                        });
                    }
                }
                None => break,
            }
            self.read_index += 1;
            self.fifo.release(self.read_index);
            count += 1;
        }
        self.window.record(count, window);
        self.arbiter.borrow_mut().dispatch();
        Ok(count)
    }

    /// Attempt to arm the interface for edge-triggered wakeup. On `Ok(())`
    /// the caller may sleep on `signal_fd()`; any other result means the
    /// caller must keep polling (see `ArmRequest`/`event_fd_arm` in
    /// the design notes for the full race argument).
    pub fn arm(&mut self, request: ArmRequest) -> Result<()> {
        if request.send_comp && !self.arbiter.borrow().is_empty() {
            return Err(TransportError::Busy);
        }
        if !request.recv {
            return Ok(());
        }
        if self.fifo.current_head() > self.read_index {
            return Err(TransportError::Busy);
        }
        self.fifo.arm(self.read_index)?;
        if self.signal.drain_any()? {
            return Err(TransportError::Busy);
        }
        Ok(())
    }

    pub fn signal_fd(&self) -> std::os::unix::io::RawFd {
        self.signal.raw_fd()
    }

    /// Non-completion flush: a release fence over all prior FIFO writes
    /// has already happened as part of each send's owner-bit publish, so
    /// this only needs to reject the unsupported completion-handle form.
    pub fn flush(&self, with_completion: bool) -> Result<()> {
        if with_completion {
            return Err(TransportError::Unsupported(
                "flush does not support an asynchronous completion handle",
            ));
        }
        Ok(())
    }

    pub fn fence(&self) -> Result<()> {
        Ok(())
    }

    pub fn query(&self) -> (Capabilities, AmLimits) {
        (self.capabilities, self.am_limits)
    }

    pub fn get_address(&self) -> InterfaceAddress {
        InterfaceAddress {
            fifo_seg_id: self.fifo_seg_id,
            signal_addr: self.fifo.read_signal_addr(),
            mapper_suffix: self.mapper.address_suffix(self.fifo_seg_id),
        }
    }

    /// A peer is reachable iff the mapper can attach its segment.
    pub fn is_reachable(&self, addr: &InterfaceAddress) -> bool {
        self.mapper.is_reachable(addr.fifo_seg_id)
    }

    pub fn estimate_perf(&self) -> PerfEstimate {
        self.cfg.perf_estimate()
    }

    /// Attach a `SenderEndpoint` to a remote interface's published
    /// address, sharing this interface's arbiter so the endpoint's
    /// pending sends are retried from this interface's `progress` calls.
    ///
    /// The peer's FIFO geometry is assumed to match this interface's own
    /// `Config` (this transport has no side channel for a peer to
    /// publish its own FIFO_SIZE/FIFO_ELEM_SIZE — symmetric
    /// configuration across cooperating peers is required, matching
    /// `mm_iface.c`'s assumption that every peer on a node was built
    /// from the same `uct_mm_iface_config_t`).
    pub fn create_endpoint(&self, peer: &InterfaceAddress) -> Result<SenderEndpoint> {
        let remote_fifo = FifoSegment::attach(&*self.mapper, peer.fifo_seg_id, &self.cfg)?;
        SenderEndpoint::new(
            self.mapper.clone(),
            Rc::new(remote_fifo),
            peer,
            Rc::clone(&self.arbiter),
            self.am_limits,
        )
    }

    pub fn pending_add(&self, op: PendingOp) {
        self.arbiter.borrow_mut().add(op);
    }
}
