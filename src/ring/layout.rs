//! Ring dimension planning.
//!
//! Given a snap length and a per-ring byte budget, derives the frame and
//! block geometry the kernel will accept: blocks are power-of-two multiples
//! of the page size, each holding an integral number of equally-sized frames,
//! with headroom in every frame for the TPACKET header, the link-level
//! address, and a 4-byte VLAN tag reservation.

use super::tpacket::{self, TpacketReq};
use crate::ethernet::{ETH_HLEN, VLAN_TAG_LEN};
use crate::{Error, Result};

/// Largest block allocation order tried first; the fabricator walks down
/// toward 0 when the kernel reports ENOMEM.
pub const DEFAULT_ORDER: u32 = 3;

/// Planned geometry for one kernel ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub frame_size: u32,
    pub frame_count: u32,
    pub block_size: u32,
    pub block_count: u32,
}

impl RingLayout {
    /// Derive a layout for `budget` bytes of ring memory at the given block
    /// allocation order.
    ///
    /// `tp_hdrlen` is the TPACKET_V2 header length reported by the kernel
    /// via PACKET_HDRLEN. A `block_count` of zero means the budget cannot
    /// fill a single block at this order; callers retry at a smaller one.
    pub fn plan(snaplen: u32, budget: u32, tp_hdrlen: u32, order: u32) -> Result<RingLayout> {
        let hdrlen_sll = tpacket::align(tp_hdrlen as usize) + std::mem::size_of::<libc::sockaddr_ll>();
        let netoff = tpacket::align(hdrlen_sll + ETH_HLEN) + VLAN_TAG_LEN;
        let frame_size = tpacket::align(netoff - ETH_HLEN + snaplen as usize) as u32;

        let mut block_size = (page_size() << order) as u32;
        while block_size < frame_size {
            block_size <<= 1;
        }
        let frames_per_block = block_size / frame_size;
        if frames_per_block == 0 {
            return Err(Error::Config(format!(
                "invalid frames per block ({block_size}/{frame_size})"
            )));
        }

        // Total frames that fit in the budget, rounded down to fill whole
        // blocks; the kernel insists frame_nr == block_nr * frames_per_block.
        let mut frame_count = budget / frame_size;
        let block_count = frame_count / frames_per_block;
        frame_count = block_count * frames_per_block;

        Ok(RingLayout {
            frame_size,
            frame_count,
            block_size,
            block_count,
        })
    }

    /// Bytes the kernel will allocate for this layout.
    pub fn total_size(&self) -> u32 {
        self.block_size * self.block_count
    }

    pub fn frames_per_block(&self) -> u32 {
        self.block_size / self.frame_size
    }

    pub fn as_req(&self) -> TpacketReq {
        TpacketReq {
            tp_block_size: self.block_size,
            tp_block_nr: self.block_count,
            tp_frame_size: self.frame_size,
            tp_frame_nr: self.frame_count,
        }
    }
}

pub fn page_size() -> usize {
    // _SC_PAGESIZE cannot fail on Linux.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
