// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Wire form of a receiver interface's address: enough for a remote
// process to attach to the FIFO segment and connect its signal socket to
// the owning interface, mirroring what uct_mm_iface_get_address packs
// (the mapper's own packed key, here just the segment id) plus whatever
// the mapper needs beyond that (kept opaque, `mapper_suffix`).

use crate::error::{Result, TransportError};
use crate::segment_mapper::SegId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub fifo_seg_id: SegId,
    pub signal_addr: Vec<u8>,
    /// Opaque bytes a non-default `SegmentMapper` may need to resolve
    /// `fifo_seg_id` beyond the 64-bit id alone. Empty for the built-in
    /// POSIX mapper.
    pub mapper_suffix: Vec<u8>,
}

impl InterfaceAddress {
    pub fn pack(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 2 + self.signal_addr.len() + 2 + self.mapper_suffix.len());
        buf.extend_from_slice(&self.fifo_seg_id.to_le_bytes());
        buf.extend_from_slice(&(self.signal_addr.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.signal_addr);
        buf.extend_from_slice(&(self.mapper_suffix.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.mapper_suffix);
        buf
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        let bad = || TransportError::InvalidParam("truncated interface address".into());
        if bytes.len() < 8 + 2 {
            return Err(bad());
        }
        let fifo_seg_id = SegId::from_le_bytes(bytes[0..8].try_into().unwrap());
        let mut off = 8;
        let sig_len = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if bytes.len() < off + sig_len + 2 {
            return Err(bad());
        }
        let signal_addr = bytes[off..off + sig_len].to_vec();
        off += sig_len;
        let suf_len = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if bytes.len() < off + suf_len {
            return Err(bad());
        }
        let mapper_suffix = bytes[off..off + suf_len].to_vec();

        Ok(InterfaceAddress {
            fifo_seg_id,
            signal_addr,
            mapper_suffix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let addr = InterfaceAddress {
            fifo_seg_id: 0x1122_3344_5566_7788,
            signal_addr: vec![0, 1, 2, 3, 4],
            mapper_suffix: vec![],
        };
        let packed = addr.pack();
        let unpacked = InterfaceAddress::unpack(&packed).unwrap();
        assert_eq!(addr, unpacked);
    }

    #[test]
    fn rejects_truncated_bytes() {
        assert!(InterfaceAddress::unpack(&[1, 2, 3]).is_err());
    }
}
