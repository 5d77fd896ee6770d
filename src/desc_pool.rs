// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Receive descriptor pool: pre-assigned, remotely-attachable buffers that
// back `am_bcopy` payloads. Generalizes chunk_storage.rs's free-list
// chunk allocator (there: broadcast large-message cache, refcounted
// across readers via a bitmask) to this transport's needs: strictly
// single-consumer (only the owning interface's progress thread ever
// touches the free list, so no lock is needed here), and each chunk is
// itself a segment a remote sender can attach to directly by id — mirrors
// uct_mm_assign_desc_to_fifo_elem's pre-assignment and
// uct_mm_iface_recv_desc_init's > 4 GiB neutralization.

use std::sync::Arc;

use crate::config::HugetlbPolicy;
use crate::error::{Result, TransportError};
use crate::segment_mapper::{MappedSegment, SegId, SegmentMapper};

/// Sentinel `seg_id` written into a descriptor whose segment is too large
/// for the FIFO element's 32-bit `seg_size` field to address. A sender
/// that sees this must fall back to `am_short`/a smaller `am_bcopy`.
pub const NEUTRAL_SEG_ID: u64 = u64::MAX;

/// A receive buffer handed out to the caller of `am_bcopy`'s pack
/// callback, then published in a FIFO element so the remote sender can
/// attach to it directly.
#[derive(Debug, Clone, Copy)]
pub struct RecvDescriptor {
    chunk: usize,
    slot: usize,
    pub seg_id: SegId,
    pub offset: u64,
    pub seg_size: u32,
}

impl RecvDescriptor {
    pub fn is_neutral(&self) -> bool {
        self.seg_id == NEUTRAL_SEG_ID
    }
}

struct Chunk {
    seg_id: SegId,
    mem: MappedSegment,
    slot_size: usize,
    /// Free-list links, `id_pool`-style: `next[i]` is the slot that
    /// follows `i` once freed. `cursor` is the head of the list.
    next: Vec<usize>,
    cursor: usize,
    slots: usize,
}

impl Chunk {
    fn new(mapper: &dyn SegmentMapper, slot_size: usize, slots: usize, hugetlb: HugetlbPolicy) -> Result<Self> {
        let total = slot_size * slots;
        let seg = mapper.alloc(total, hugetlb)?;
        let next = (1..=slots).collect();
        Ok(Chunk {
            seg_id: seg.id,
            mem: seg.mem,
            slot_size,
            next,
            cursor: 0,
            slots,
        })
    }

    fn acquire(&mut self) -> Option<usize> {
        if self.cursor >= self.slots {
            return None;
        }
        let id = self.cursor;
        self.cursor = self.next[id];
        Some(id)
    }

    fn release(&mut self, slot: usize) {
        self.next[slot] = self.cursor;
        self.cursor = slot;
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        unsafe { self.mem.as_mut_ptr().add(slot * self.slot_size) }
    }
}

/// Grow-on-demand pool of receive descriptors, private to the owning
/// interface.
pub struct DescriptorPool {
    mapper: Arc<dyn SegmentMapper>,
    /// User-reserved bytes before each slot's payload area (§4.4
    /// "headroom"); subtracted out of `slot_size` when reporting
    /// `seg_size` and added to the slot base when computing `offset`.
    headroom: usize,
    /// Usable payload bytes per slot, i.e. `SEG_SIZE`.
    payload_size: usize,
    slots_per_chunk: usize,
    hugetlb: HugetlbPolicy,
    chunks: Vec<Chunk>,
    /// Pre-fetched descriptor kept ready so the hot receive path never
    /// allocates; refilled immediately after a descriptor is handed to a
    /// FIFO element (mirrors `last_recv_desc` in mm_iface.c).
    last_recv_desc: Option<RecvDescriptor>,
}

impl DescriptorPool {
    pub fn new(
        mapper: Arc<dyn SegmentMapper>,
        headroom: usize,
        payload_size: usize,
        slots_per_chunk: usize,
        headroom_chunks: usize,
        hugetlb: HugetlbPolicy,
    ) -> Result<Self> {
        let mut pool = DescriptorPool {
            mapper,
            headroom,
            payload_size,
            slots_per_chunk,
            hugetlb,
            chunks: Vec::new(),
            last_recv_desc: None,
        };
        for _ in 0..headroom_chunks.max(1) {
            pool.grow()?;
        }
        pool.last_recv_desc = Some(pool.acquire_uncached()?);
        Ok(pool)
    }

    fn slot_size(&self) -> usize {
        self.headroom + self.payload_size
    }

    fn grow(&mut self) -> Result<()> {
        let chunk = Chunk::new(&*self.mapper, self.slot_size(), self.slots_per_chunk, self.hugetlb)?;
        self.chunks.push(chunk);
        Ok(())
    }

    fn neutralize(&self, mut desc: RecvDescriptor) -> RecvDescriptor {
        if self.slot_size() as u64 > u32::MAX as u64 {
            desc.seg_id = NEUTRAL_SEG_ID;
            desc.seg_size = 0;
        }
        desc
    }

    fn acquire_uncached(&mut self) -> Result<RecvDescriptor> {
        for (chunk_idx, chunk) in self.chunks.iter_mut().enumerate() {
            if let Some(slot) = chunk.acquire() {
                let desc = RecvDescriptor {
                    chunk: chunk_idx,
                    slot,
                    seg_id: chunk.seg_id,
                    offset: (slot * chunk.slot_size + self.headroom) as u64,
                    seg_size: self.payload_size as u32,
                };
                return Ok(self.neutralize(desc));
            }
        }
        self.grow()?;
        let chunk_idx = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_idx];
        let slot = chunk.acquire().ok_or(TransportError::NoResources)?;
        let desc = RecvDescriptor {
            chunk: chunk_idx,
            slot,
            seg_id: chunk.seg_id,
            offset: (slot * chunk.slot_size + self.headroom) as u64,
            seg_size: self.payload_size as u32,
        };
        Ok(self.neutralize(desc))
    }

    /// Hand out the pre-fetched descriptor and immediately refill it.
    pub fn acquire(&mut self) -> Result<RecvDescriptor> {
        let desc = match self.last_recv_desc.take() {
            Some(d) => d,
            None => self.acquire_uncached()?,
        };
        self.last_recv_desc = self.acquire_uncached().ok();
        Ok(desc)
    }

    pub fn release(&mut self, desc: RecvDescriptor) {
        if let Some(chunk) = self.chunks.get_mut(desc.chunk) {
            chunk.release(desc.slot);
        }
    }

    pub fn payload_ptr(&self, desc: &RecvDescriptor) -> *mut u8 {
        unsafe { self.chunks[desc.chunk].slot_ptr(desc.slot).add(self.headroom) }
    }

    /// Usable payload bytes per descriptor (`SEG_SIZE`).
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }
}
