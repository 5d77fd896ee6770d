// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Sender endpoint: attaches to a remote interface's FIFO and signal
// socket and exposes the put/get/am/atomic/flush/fence/pending surface.
// Ported in spirit from uct_mm_ep_t's operations in mm_iface.c/mm_ep.c,
// generalized to this crate's FifoSegment/DescriptorPool abstractions.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::address::InterfaceAddress;
use crate::arbiter::{Arbiter, PendingOp};
use crate::caps::AmLimits;
use crate::config::Config;
use crate::error::{Result, TransportError};
use crate::fifo::FifoSegment;
use crate::segment_mapper::{MappedSegment, SegId, SegmentMapper};

/// An attached remote segment, cached so repeated `put`/`get`/`atomic`
/// calls against the same region don't re-open shared memory each time.
struct AttachedSegment {
    id: SegId,
    mem: MappedSegment,
}

pub struct SenderEndpoint {
    mapper: Arc<dyn SegmentMapper>,
    fifo: Rc<FifoSegment>,
    signal: crate::signal::SignalSender,
    arbiter: Rc<RefCell<Arbiter>>,
    am_limits: AmLimits,
    /// Local cache of remote segments attached for put/get/atomic, keyed
    /// by the segment id embedded in the target's address.
    attached: RefCell<Vec<AttachedSegment>>,
    fenced: bool,
}

impl SenderEndpoint {
    pub(crate) fn new(
        mapper: Arc<dyn SegmentMapper>,
        fifo: Rc<FifoSegment>,
        peer: &InterfaceAddress,
        arbiter: Rc<RefCell<Arbiter>>,
        am_limits: AmLimits,
    ) -> Result<Self> {
        let signal = crate::signal::SignalSender::connect(&peer.signal_addr)?;
        Ok(SenderEndpoint {
            mapper,
            fifo,
            signal,
            arbiter,
            am_limits,
            attached: RefCell::new(Vec::new()),
            fenced: false,
        })
    }

    fn attach_remote(&self, seg_id: SegId, size: usize) -> Result<*mut u8> {
        {
            let cache = self.attached.borrow();
            if let Some(entry) = cache.iter().find(|e| e.id == seg_id) {
                return Ok(entry.mem.as_mut_ptr());
            }
        }
        let mem = self.mapper.attach(seg_id, size)?;
        let ptr = mem.as_mut_ptr();
        self.attached
            .borrow_mut()
            .push(AttachedSegment { id: seg_id, mem });
        Ok(ptr)
    }

    fn maybe_signal(&self, reserved_index: u64) -> Result<()> {
        // Only disturb the consumer if it is actually armed for wakeup;
        // otherwise it is already spinning in its own progress loop.
        // `disarm` clears EVENT_ARMED atomically so at most one signal is
        // ever in flight for a given arm window.
        let _ = reserved_index;
        if self.fifo.disarm() {
            self.signal.signal()?;
        }
        Ok(())
    }

    /// Send up to `am_limits.max_short` bytes inline in the FIFO element.
    pub fn am_short(&self, am_id: u8, data: &[u8]) -> Result<()> {
        if data.len() > self.am_limits.max_short {
            return Err(TransportError::InvalidParam(format!(
                "am_short payload ({} bytes) exceeds max_short ({})",
                data.len(),
                self.am_limits.max_short
            )));
        }
        let index = self.fifo.reserve()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.fifo.payload_ptr(index), data.len());
        }
        self.fifo.commit_inline(index, am_id, data.len() as u32);
        self.maybe_signal(index)
    }

    /// Send up to `am_limits.max_bcopy` bytes via the receiver's
    /// pre-assigned descriptor buffer for this slot. `pack` returns the
    /// number of bytes written.
    ///
    /// The descriptor is resolved and the remote segment attached against
    /// the slot `reserve()` is about to hand out (peeked via `current_head`,
    /// never reserved yet) *before* `reserve()` itself runs, so a
    /// neutralized descriptor or a failed attach returns an error without
    /// ever consuming a FIFO slot. `reserve()` is this function's last
    /// fallible step, the same way `commit_inline` is `am_short`'s: nothing
    /// between it and `commit_desc_send` can fail.
    pub fn am_bcopy(&self, am_id: u8, pack: impl FnOnce(&mut [u8]) -> usize) -> Result<usize> {
        let peeked = self.fifo.current_head();
        let (seg_id, offset, capacity) = self.fifo.current_descriptor(peeked);
        if seg_id == crate::desc_pool::NEUTRAL_SEG_ID || capacity == 0 {
            return Err(TransportError::Unsupported(
                "receiver's descriptor for this slot was neutralized (segment too large)",
            ));
        }
        let base = self.attach_remote(seg_id, offset as usize + capacity as usize)?;
        let index = self.fifo.reserve()?;
        let buf = unsafe { std::slice::from_raw_parts_mut(base.add(offset as usize), capacity as usize) };
        let written = pack(buf).min(capacity as usize);
        self.fifo.commit_desc_send(index, am_id, written as u32);
        self.maybe_signal(index)?;
        Ok(written)
    }

    pub fn put_short(&self, seg_id: SegId, offset: u64, data: &[u8]) -> Result<()> {
        let base = self.attach_remote(seg_id, offset as usize + data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Write `len` bytes at `offset` in the remote segment by invoking
    /// `pack` against a direct view of that span (caller must know the
    /// span's size up front, unlike `am_bcopy` whose span is the
    /// receiver's pre-assigned descriptor).
    pub fn put_bcopy(&self, seg_id: SegId, offset: u64, len: usize, pack: impl FnOnce(&mut [u8])) -> Result<()> {
        let base = self.attach_remote(seg_id, offset as usize + len)?;
        let slice = unsafe { std::slice::from_raw_parts_mut(base.add(offset as usize), len) };
        pack(slice);
        Ok(())
    }

    pub fn get_bcopy(&self, seg_id: SegId, offset: u64, len: usize, out: &mut [u8]) -> Result<()> {
        debug_assert!(out.len() >= len);
        let base = self.attach_remote(seg_id, offset as usize + len)?;
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(offset as usize), out.as_mut_ptr(), len);
        }
        Ok(())
    }

    /// CPU-side atomic add on a remote `u64`, the only atomic width this
    /// transport exposes (`ATOMIC_CPU` capability).
    pub fn atomic_add64(&self, seg_id: SegId, offset: u64, value: u64) -> Result<u64> {
        let base = self.attach_remote(seg_id, offset as usize + 8)?;
        let atomic = unsafe { &*(base.add(offset as usize) as *const std::sync::atomic::AtomicU64) };
        Ok(atomic.fetch_add(value, std::sync::atomic::Ordering::AcqRel))
    }

    pub fn atomic_cswap64(&self, seg_id: SegId, offset: u64, compare: u64, swap: u64) -> Result<u64> {
        let base = self.attach_remote(seg_id, offset as usize + 8)?;
        let atomic = unsafe { &*(base.add(offset as usize) as *const std::sync::atomic::AtomicU64) };
        match atomic.compare_exchange(
            compare,
            swap,
            std::sync::atomic::Ordering::AcqRel,
            std::sync::atomic::Ordering::Acquire,
        ) {
            Ok(old) | Err(old) => Ok(old),
        }
    }

    /// All memory-access ops on this endpoint complete synchronously
    /// inside their call, so flush only needs to confirm the FIFO itself
    /// has nothing outstanding — it always has, hence `Ok(())`.
    /// A completion handle is not supported (mirrors
    /// uct_mm_iface_flush's UCS_ERR_UNSUPPORTED for non-NULL comp).
    pub fn flush(&self, with_completion: bool) -> Result<()> {
        if with_completion {
            return Err(TransportError::Unsupported(
                "flush does not support an asynchronous completion handle",
            ));
        }
        Ok(())
    }

    /// Marks that the next send on this endpoint must be ordered after
    /// all prior sends on every endpoint sharing this worker; since every
    /// operation here already completes synchronously there is nothing
    /// further to enforce, but the flag is tracked so `check` can report
    /// it truthfully.
    pub fn fence(&mut self) -> Result<()> {
        self.fenced = true;
        Ok(())
    }

    /// Connectivity check: the remote interface's owning process is still
    /// alive and its signal socket still accepts writes.
    pub fn check(&self) -> Result<()> {
        let pid = self.fifo.owner_pid();
        if pid != 0 {
            let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
            // EPERM means the process exists but we can't signal it, which
            // still counts as alive; only ESRCH means it's gone.
            if rc != 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
                return Err(TransportError::ConnectionReset);
            }
        }
        self.signal.signal()
    }

    /// Queue `op` for retry; call when `am_short`/`am_bcopy`/etc. returned
    /// `NoResources`.
    pub fn pending_add(&self, op: PendingOp) {
        self.arbiter.borrow_mut().add(op);
    }

    pub fn pending_purge(&self, purge: impl FnMut(&mut PendingOp) -> bool) {
        self.arbiter.borrow_mut().purge(purge);
    }
}
