// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The "memory-domain mapper" is out of scope as a pluggable subsystem;
// this module gives it the one concrete shape this crate needs: named
// POSIX shared memory, reachable from a 64-bit segment id alone (no
// side-channel registry), with an optional huge-page path for callers
// that ask for it. Built on ShmHandle (shm.rs), which already does the
// named-open / ref-count / auto-unlink bookkeeping.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::HugetlbPolicy;
use crate::error::{Result, TransportError};
use crate::shm::{ShmHandle, ShmOpenMode};

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Stable, process-wide-unique identifier for an allocated segment. A peer
/// that only knows the id (as published inside an `InterfaceAddress`) can
/// reconstruct the same shared memory name and attach to it.
pub type SegId = u64;

fn segment_name(seg_id: SegId) -> String {
    format!("mm-transport-seg-{seg_id:016x}")
}

fn next_seg_id() -> SegId {
    // High 32 bits carry the pid so that two processes allocating
    // concurrently never collide; low 32 bits are a per-process counter.
    let pid = std::process::id() as u64;
    let counter = SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    (pid << 32) | (counter & 0xffff_ffff)
}

/// A mapped region backing either the FIFO control block or a receive
/// descriptor pool chunk.
pub enum MappedSegment {
    Named(ShmHandle),
    /// Anonymous, huge-page-backed mapping. Cannot be re-attached by a
    /// peer process from a bare segment id; used only when the caller
    /// requested `HugetlbPolicy::Yes`/`Try` and the mapper chose to trade
    /// attachability for guaranteed huge pages.
    Anonymous { ptr: *mut u8, len: usize },
}

unsafe impl Send for MappedSegment {}
unsafe impl Sync for MappedSegment {}

impl MappedSegment {
    pub fn as_mut_ptr(&self) -> *mut u8 {
        match self {
            MappedSegment::Named(h) => h.as_mut_ptr(),
            MappedSegment::Anonymous { ptr, .. } => *ptr,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MappedSegment::Named(h) => h.user_size(),
            MappedSegment::Anonymous { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for MappedSegment {
    fn drop(&mut self) {
        if let MappedSegment::Anonymous { ptr, len } = self {
            if !ptr.is_null() {
                unsafe { libc::munmap(*ptr as *mut libc::c_void, *len) };
            }
        }
    }
}

/// A newly allocated or re-attached segment together with the id a peer
/// needs to attach to it.
pub struct Segment {
    pub id: SegId,
    pub mem: MappedSegment,
}

/// Allocates segments that are reachable cross-process purely from a
/// `SegId`, and reports whether the FIFO's segment can be re-attached
/// after the owning process restarts (drives the `EP_CHECK` capability).
pub trait SegmentMapper: Send + Sync {
    fn alloc(&self, size: usize, hugetlb: HugetlbPolicy) -> Result<Segment>;
    fn attach(&self, id: SegId, size: usize) -> Result<MappedSegment>;
    /// Whether segments from this mapper can be reopened by name (as
    /// opposed to the anonymous huge-page fallback, which cannot).
    fn supports_reattach(&self) -> bool {
        true
    }
    /// Opaque bytes identifying this mapper's namespace, folded into a
    /// packed `InterfaceAddress` so a peer can tell whether it is capable
    /// of attaching to the segments it names. Empty when the mapper has
    /// no namespace beyond the segment id itself.
    fn address_suffix(&self, _id: SegId) -> Vec<u8> {
        Vec::new()
    }
    /// Whether `id` currently names a segment this mapper could attach to,
    /// without actually mapping it. Default assumes reachability; mappers
    /// that can cheaply probe existence should override this.
    fn is_reachable(&self, _id: SegId) -> bool {
        true
    }
}

/// Default mapper: POSIX named shared memory via `shm_open`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixSegmentMapper;

fn try_anonymous_hugetlb(size: usize) -> io::Result<*mut u8> {
    let page = 1usize << 21; // 2 MiB, the common x86_64 huge page size
    let rounded = size.div_ceil(page) * page;
    let mem = unsafe {
        libc::mmap(
            ptr::null_mut(),
            rounded,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
            -1,
            0,
        )
    };
    if mem == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(mem as *mut u8)
}

impl SegmentMapper for PosixSegmentMapper {
    fn alloc(&self, size: usize, hugetlb: HugetlbPolicy) -> Result<Segment> {
        match hugetlb {
            HugetlbPolicy::No => {
                let id = next_seg_id();
                let handle = ShmHandle::acquire(&segment_name(id), size, ShmOpenMode::Create)?;
                Ok(Segment {
                    id,
                    mem: MappedSegment::Named(handle),
                })
            }
            HugetlbPolicy::Yes => {
                let ptr = try_anonymous_hugetlb(size).map_err(TransportError::Io)?;
                Ok(Segment {
                    id: next_seg_id(),
                    mem: MappedSegment::Anonymous { ptr, len: size },
                })
            }
            HugetlbPolicy::Try => {
                if let Ok(ptr) = try_anonymous_hugetlb(size) {
                    return Ok(Segment {
                        id: next_seg_id(),
                        mem: MappedSegment::Anonymous { ptr, len: size },
                    });
                }
                // Fall back silently to a normal, re-attachable segment.
                let id = next_seg_id();
                let handle = ShmHandle::acquire(&segment_name(id), size, ShmOpenMode::Create)?;
                Ok(Segment {
                    id,
                    mem: MappedSegment::Named(handle),
                })
            }
        }
    }

    fn attach(&self, id: SegId, size: usize) -> Result<MappedSegment> {
        let handle = ShmHandle::acquire(&segment_name(id), size, ShmOpenMode::Open)?;
        Ok(MappedSegment::Named(handle))
    }

    fn is_reachable(&self, id: SegId) -> bool {
        let posix_name = crate::shm_name::make_shm_name(&segment_name(id));
        let name = match std::ffi::CString::new(posix_name) {
            Ok(n) => n,
            Err(_) => return false,
        };
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }
}
