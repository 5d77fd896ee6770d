// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory ring FIFO: owner-bit signaled slots, an EVENT_ARMED bit
// folded into the head cursor, and batched tail release. Generalizes
// proto/shm_ring.rs's fixed-T/fixed-N SPSC ring into the variable-size,
// variable-capacity layout this transport needs, and adds the
// producer/consumer protocol mm_iface.c implements around its FIFO.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::config::{Config, HugetlbPolicy};
use crate::error::{Result, TransportError};
use crate::segment_mapper::{MappedSegment, SegId, Segment, SegmentMapper};

/// Bit 63 of the head cursor: set when the consumer has armed the FIFO
/// for edge-triggered wakeup via its signal socket.
pub const EVENT_ARMED: u64 = 1 << 63;
const INDEX_MASK: u64 = !EVENT_ARMED;

const CACHE_LINE: usize = 64;
const SIGNAL_ADDR_CAP: usize = 32;

#[repr(C)]
struct ControlHeader {
    /// Producer write cursor (low 63 bits) with EVENT_ARMED folded into
    /// bit 63. Only the consumer ever sets/clears EVENT_ARMED; only the
    /// producer ever advances the low bits — both via CAS so the two
    /// never clobber each other.
    head: AtomicU64,
    _pad0: [u8; CACHE_LINE - 8],
    /// Last index the consumer has published as released back to the
    /// producer. Republished only every `release_factor_mask + 1`
    /// elements.
    tail: AtomicU64,
    _pad1: [u8; CACHE_LINE - 8],
    fifo_size: u32,
    fifo_shift: u32,
    elem_stride: u32,
    release_factor_mask: u32,
    signal_addr_len: AtomicU32,
    constructed: AtomicU32,
    /// Owner pid of the receiver, published at construction for a sender's
    /// `check` liveness probe (§4.2).
    pid: AtomicU32,
    _pad2: [u8; CACHE_LINE - 4 * 7],
    signal_addr: [AtomicU8; SIGNAL_ADDR_CAP],
    _pad3: [u8; CACHE_LINE - SIGNAL_ADDR_CAP],
}

const _: () = assert!(std::mem::size_of::<ControlHeader>() % CACHE_LINE == 0);

fn head_tail_on_distinct_cache_lines() {
    let off_head = std::mem::offset_of!(ControlHeader, head);
    let off_tail = std::mem::offset_of!(ControlHeader, tail);
    debug_assert!(off_tail - off_head >= CACHE_LINE);
}

/// Per-element header, directly preceding the element's payload bytes.
#[repr(C)]
struct ElemHeader {
    /// Bit 0: owner parity this slot was last written with. Bit 1: set
    /// when the element references a receive-descriptor-pool buffer
    /// instead of carrying its payload inline.
    flags: AtomicU8,
    am_id: AtomicU8,
    _pad: [u8; 2],
    /// Bytes actually in use this send: the inline payload length, or the
    /// bcopy bytes written into the assigned descriptor buffer.
    length: AtomicU32,
    /// Receiver-assigned descriptor location, persistent across sends
    /// until the receiver reassigns it (e.g. after a callback retains the
    /// previous buffer). The producer only ever reads these.
    desc_seg_id: AtomicU64,
    desc_offset: AtomicU64,
    desc_capacity: AtomicU32,
    _pad2: [u8; 4],
}

const ELEM_HEADER_SIZE: usize = std::mem::size_of::<ElemHeader>();
const OWNER_BIT: u8 = 1;
const DESC_BIT: u8 = 1 << 1;

fn expected_owner(index: u64, shift: u32) -> u8 {
    (((index >> shift) & 1) as u8) * OWNER_BIT
}

/// What a consumer found in a ready slot.
pub enum ElemPayload<'a> {
    Inline { am_id: u8, data: &'a [u8] },
    Descriptor { am_id: u8, seg_id: u64, seg_size: u32, offset: u64 },
}

pub struct FifoGeometry {
    pub size: u32,
    pub shift: u32,
    pub elem_stride: u32,
    pub release_factor_mask: u32,
}

impl FifoGeometry {
    fn from_config(cfg: &Config) -> Self {
        FifoGeometry {
            size: cfg.fifo_size,
            shift: cfg.fifo_size.trailing_zeros(),
            elem_stride: align_up(cfg.elem_size, 8) as u32,
            release_factor_mask: cfg.release_factor_mask(),
        }
    }

    fn layout_size(&self) -> usize {
        std::mem::size_of::<ControlHeader>() + self.elem_stride as usize * self.size as usize
    }
}

fn align_up(v: usize, align: usize) -> usize {
    (v + align - 1) / align * align
}

/// One end of the shared ring: owns (producer/consumer pair are both
/// views over the same mapping) the mapped control block plus element
/// array.
pub struct FifoSegment {
    mem: MappedSegment,
    geom: FifoGeometry,
}

unsafe impl Send for FifoSegment {}
unsafe impl Sync for FifoSegment {}

impl FifoSegment {
    pub fn create(
        mapper: &dyn SegmentMapper,
        cfg: &Config,
    ) -> Result<(SegId, Self)> {
        cfg.validate()?;
        let geom = FifoGeometry::from_config(cfg);
        let Segment { id, mem } = mapper.alloc(geom.layout_size(), cfg.fifo_hugetlb)?;
        let seg = FifoSegment { mem, geom };
        seg.init_header();
        Ok((id, seg))
    }

    pub fn attach(mapper: &dyn SegmentMapper, id: SegId, cfg: &Config) -> Result<Self> {
        cfg.validate()?;
        let geom = FifoGeometry::from_config(cfg);
        let mem = mapper.attach(id, geom.layout_size())?;
        let seg = FifoSegment { mem, geom };
        seg.wait_constructed()?;
        Ok(seg)
    }

    fn header(&self) -> &ControlHeader {
        unsafe { &*(self.mem.as_mut_ptr() as *const ControlHeader) }
    }

    fn init_header(&self) {
        head_tail_on_distinct_cache_lines();
        let hdr = self.header();
        if hdr.constructed.load(Ordering::Acquire) == 1 {
            return;
        }
        hdr.head.store(0, Ordering::Relaxed);
        hdr.tail.store(0, Ordering::Relaxed);
        hdr.fifo_size.store(self.geom.size, Ordering::Relaxed);
        hdr.fifo_shift.store(self.geom.shift, Ordering::Relaxed);
        hdr.elem_stride.store(self.geom.elem_stride, Ordering::Relaxed);
        hdr.release_factor_mask
            .store(self.geom.release_factor_mask, Ordering::Relaxed);
        hdr.signal_addr_len.store(0, Ordering::Relaxed);
        hdr.pid.store(std::process::id(), Ordering::Relaxed);
        for i in 0..self.geom.size as u64 {
            let slot = unsafe { &*self.elem_ptr(i) };
            slot.flags.store(0, Ordering::Relaxed);
            slot.am_id.store(0, Ordering::Relaxed);
            slot.length.store(0, Ordering::Relaxed);
            slot.desc_seg_id.store(0, Ordering::Relaxed);
            slot.desc_offset.store(0, Ordering::Relaxed);
            slot.desc_capacity.store(0, Ordering::Relaxed);
        }
        hdr.constructed.store(1, Ordering::Release);
    }

    fn wait_constructed(&self) -> Result<()> {
        let hdr = self.header();
        let mut k = 0u32;
        while hdr.constructed.load(Ordering::Acquire) == 0 {
            crate::spin_lock::adaptive_yield_pub(&mut k);
            if k > 1_000_000 {
                return Err(TransportError::InvalidParam(
                    "peer never finished constructing FIFO segment".into(),
                ));
            }
        }
        Ok(())
    }

    fn elem_ptr(&self, index: u64) -> *mut ElemHeader {
        let slot = (index & (self.geom.size as u64 - 1)) as usize;
        let base = unsafe {
            self.mem
                .as_mut_ptr()
                .add(std::mem::size_of::<ControlHeader>())
        };
        unsafe { base.add(slot * self.geom.elem_stride as usize) as *mut ElemHeader }
    }

    pub fn elem_payload_offset(&self) -> usize {
        ELEM_HEADER_SIZE
    }

    pub fn elem_capacity(&self) -> usize {
        self.geom.elem_stride as usize - ELEM_HEADER_SIZE
    }

    pub fn geometry(&self) -> &FifoGeometry {
        &self.geom
    }

    // --- producer side --------------------------------------------------

    /// Reserve the next element slot for writing. Returns the reserved
    /// index (needed by `commit_*`) or `NoResources` if the FIFO is full.
    pub fn reserve(&self) -> Result<u64> {
        let hdr = self.header();
        loop {
            let head = hdr.head.load(Ordering::Relaxed);
            let idx = head & INDEX_MASK;
            let tail = hdr.tail.load(Ordering::Acquire);
            if idx.wrapping_sub(tail) >= self.geom.size as u64 {
                return Err(TransportError::NoResources);
            }
            let new_head = (idx + 1) | (head & EVENT_ARMED);
            if hdr
                .head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(idx);
            }
        }
    }

    /// Raw pointer to the payload region of a reserved slot, for the
    /// caller to copy bytes into before committing.
    pub fn payload_ptr(&self, index: u64) -> *mut u8 {
        unsafe { (self.elem_ptr(index) as *mut u8).add(ELEM_HEADER_SIZE) }
    }

    pub fn commit_inline(&self, index: u64, am_id: u8, len: u32) {
        let elem = unsafe { &*self.elem_ptr(index) };
        elem.am_id.store(am_id, Ordering::Relaxed);
        elem.length.store(len, Ordering::Relaxed);
        let owner = expected_owner(index, self.geom.shift);
        elem.flags.store(owner, Ordering::Release);
    }

    /// Receiver-only: (re-)assign the descriptor-pool buffer a sender
    /// must write `am_bcopy` payloads into for this element slot. Called
    /// once per slot at construction and again whenever a consumed
    /// descriptor-backed element's buffer is retained by the AM callback
    /// and therefore needs replacing before the slot can be reused.
    pub fn assign_descriptor(&self, index: u64, seg_id: u64, offset: u64, capacity: u32) {
        let elem = unsafe { &*self.elem_ptr(index) };
        elem.desc_seg_id.store(seg_id, Ordering::Relaxed);
        elem.desc_offset.store(offset, Ordering::Relaxed);
        elem.desc_capacity.store(capacity, Ordering::Release);
    }

    /// Sender-side: where to write this element's next bcopy payload.
    pub fn current_descriptor(&self, index: u64) -> (u64, u64, u32) {
        let elem = unsafe { &*self.elem_ptr(index) };
        (
            elem.desc_seg_id.load(Ordering::Acquire),
            elem.desc_offset.load(Ordering::Relaxed),
            elem.desc_capacity.load(Ordering::Relaxed),
        )
    }

    /// Sender-side: publish that `len` bytes were written into the
    /// element's currently assigned descriptor buffer.
    pub fn commit_desc_send(&self, index: u64, am_id: u8, len: u32) {
        let elem = unsafe { &*self.elem_ptr(index) };
        elem.am_id.store(am_id, Ordering::Relaxed);
        elem.length.store(len, Ordering::Relaxed);
        let owner = expected_owner(index, self.geom.shift) | DESC_BIT;
        elem.flags.store(owner, Ordering::Release);
    }

    /// Publish the receiver's signal-socket address so a sender can reach
    /// it through `arm`'s wakeup path. Only the constructing side calls
    /// this, before any reservation traffic begins.
    pub fn publish_signal_addr(&self, addr: &[u8]) {
        debug_assert!(addr.len() <= SIGNAL_ADDR_CAP);
        let hdr = self.header();
        for (slot, byte) in hdr.signal_addr.iter().zip(addr.iter()) {
            slot.store(*byte, Ordering::Relaxed);
        }
        hdr.signal_addr_len.store(addr.len() as u32, Ordering::Release);
    }

    /// Owner pid of the receiver that constructed this FIFO, for a
    /// sender's `check` liveness probe.
    pub fn owner_pid(&self) -> u32 {
        self.header().pid.load(Ordering::Relaxed)
    }

    pub fn read_signal_addr(&self) -> Vec<u8> {
        let hdr = self.header();
        let len = hdr.signal_addr_len.load(Ordering::Acquire) as usize;
        hdr.signal_addr[..len]
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    // --- consumer side ----------------------------------------------------

    /// True if the slot at `read_index` has been filled by the producer.
    pub fn has_new_data(&self, read_index: u64) -> bool {
        let elem = unsafe { &*self.elem_ptr(read_index) };
        let flags = elem.flags.load(Ordering::Acquire);
        (flags & OWNER_BIT) == expected_owner(read_index, self.geom.shift)
    }

    pub fn peek(&self, read_index: u64) -> Option<(bool, u8, u32, u64, u64)> {
        if !self.has_new_data(read_index) {
            return None;
        }
        let elem = unsafe { &*self.elem_ptr(read_index) };
        let flags = elem.flags.load(Ordering::Acquire);
        Some((
            flags & DESC_BIT != 0,
            elem.am_id.load(Ordering::Relaxed),
            elem.length.load(Ordering::Relaxed),
            elem.desc_seg_id.load(Ordering::Relaxed),
            elem.desc_offset.load(Ordering::Relaxed),
        ))
    }

    pub fn payload(&self, read_index: u64, len: u32) -> &[u8] {
        let ptr = self.payload_ptr(read_index);
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }

    /// Combines `peek` and `payload` into the caller-facing view of a
    /// ready slot.
    pub fn read_elem(&self, read_index: u64) -> Option<ElemPayload<'_>> {
        let (is_desc, am_id, length, seg_id, offset) = self.peek(read_index)?;
        if is_desc {
            Some(ElemPayload::Descriptor {
                am_id,
                seg_id,
                seg_size: length,
                offset,
            })
        } else {
            Some(ElemPayload::Inline {
                am_id,
                data: self.payload(read_index, length),
            })
        }
    }

    /// Advance the consumer's local read index; republish `tail` only
    /// when `release_factor_mask` says the batch is due.
    pub fn release(&self, new_read_index: u64) {
        let hdr = self.header();
        if new_read_index & self.geom.release_factor_mask as u64 == 0 {
            hdr.tail.store(new_read_index, Ordering::Release);
        }
    }

    /// Force-publish the tail regardless of the release batching factor;
    /// used by `flush`/`fence` and on the final drain before teardown.
    pub fn force_release(&self, new_read_index: u64) {
        self.header().tail.store(new_read_index, Ordering::Release);
    }

    pub fn current_tail(&self) -> u64 {
        self.header().tail.load(Ordering::Acquire)
    }

    pub fn current_head(&self) -> u64 {
        self.header().head.load(Ordering::Acquire) & INDEX_MASK
    }

    // --- EVENT_ARMED ------------------------------------------------------

    /// Atomically set EVENT_ARMED, preserving the producer's index bits.
    /// Returns `Busy` if new data already arrived between the caller's
    /// last poll and the CAS (mirrors uct_mm_iface_event_fd_arm's
    /// "recheck after arming" step).
    pub fn arm(&self, read_index: u64) -> Result<()> {
        let hdr = self.header();
        loop {
            let head = hdr.head.load(Ordering::Acquire);
            if (head & INDEX_MASK) != read_index {
                return Err(TransportError::Busy);
            }
            let armed = head | EVENT_ARMED;
            if head == armed {
                return Ok(());
            }
            if hdr
                .head
                .compare_exchange_weak(head, armed, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.header().head.load(Ordering::Acquire) & EVENT_ARMED != 0
    }

    /// Clear EVENT_ARMED while preserving the index bits; used by the
    /// producer right before it signals the consumer so only one wakeup
    /// is ever in flight.
    pub fn disarm(&self) -> bool {
        let hdr = self.header();
        loop {
            let head = hdr.head.load(Ordering::Acquire);
            if head & EVENT_ARMED == 0 {
                return false;
            }
            let cleared = head & INDEX_MASK;
            if hdr
                .head
                .compare_exchange_weak(head, cleared, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}
