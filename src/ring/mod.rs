//! Userspace view of a kernel packet ring.
//!
//! The kernel lays the ring out as `block_count` contiguous blocks, each
//! holding `block_size / frame_size` fixed-size frame slots. [`Ring`] indexes
//! those slots as a circular sequence of [`Entry`] handles over the shared
//! mapping, with an integer cursor pointing at the next slot to inspect.

pub mod layout;
pub mod tpacket;

pub use layout::{RingLayout, DEFAULT_ORDER};

use std::sync::atomic::{AtomicU32, Ordering};

use tpacket::Tpacket2Hdr;

/// Which kernel ring a fabrication request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    Rx,
    Tx,
}

impl RingKind {
    pub fn sockopt(self) -> libc::c_int {
        match self {
            RingKind::Rx => tpacket::PACKET_RX_RING,
            RingKind::Tx => tpacket::PACKET_TX_RING,
        }
    }
}

/// Handle over one frame slot: a raw pointer into the shared mapping plus the
/// index of the next slot in ring order.
///
/// The frame's storage is co-owned with the kernel. The status word at the
/// start of the slot conveys ownership: reads of the frame body are only
/// valid after [`Entry::status`] observes TP_STATUS_USER, and handing the
/// slot back goes through [`Entry::set_status`].
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    raw: *mut u8,
    next: usize,
}

impl Entry {
    /// Pointer to the start of the slot (the TPACKET_V2 header).
    pub fn raw(&self) -> *mut u8 {
        self.raw
    }

    fn status_word(&self) -> &AtomicU32 {
        // tp_status is the first field of the slot header. Going through an
        // atomic keeps the status load/store ordered against the frame-body
        // accesses on either side of the ownership handoff.
        unsafe { &*(self.raw as *const AtomicU32) }
    }

    /// Load the slot's status word (acquire).
    pub fn status(&self) -> u32 {
        self.status_word().load(Ordering::Acquire)
    }

    /// Store the slot's status word (release), handing ownership over.
    pub fn set_status(&self, status: u32) {
        self.status_word().store(status, Ordering::Release);
    }

    /// Snapshot the slot's TPACKET_V2 header.
    pub fn header(&self) -> Tpacket2Hdr {
        unsafe { std::ptr::read_volatile(self.raw as *const Tpacket2Hdr) }
    }

    /// Set the outgoing frame length ahead of a TX handoff.
    pub fn set_tx_len(&self, len: u32) {
        unsafe {
            let hdr = self.raw as *mut Tpacket2Hdr;
            std::ptr::addr_of_mut!((*hdr).tp_len).write_volatile(len);
        }
    }
}

/// One mapped kernel ring plus the circular entry sequence over it.
#[derive(Debug)]
pub struct Ring {
    layout: RingLayout,
    size: u32,
    entries: Vec<Entry>,
    cursor: usize,
}

// Entries point into the mmap region owned by the enclosing instance; the
// ring moves with it and is never shared between threads.
unsafe impl Send for Ring {}

impl Ring {
    /// Record a kernel-accepted layout. Entries are built once the socket
    /// has been mapped, via [`Ring::build_entries`].
    pub fn new(layout: RingLayout) -> Self {
        Ring {
            layout,
            size: layout.total_size(),
            entries: Vec::new(),
            cursor: 0,
        }
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// Total bytes of this ring within the shared mapping.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Build the circular entry sequence over the mapped region starting at
    /// `base`. Each entry's slot lies at
    /// `base + block * block_size + frame * frame_size`.
    ///
    /// # Safety
    ///
    /// `base` must point at least `self.size()` mapped, writable bytes that
    /// stay valid for the life of the ring.
    pub unsafe fn build_entries(&mut self, base: *mut u8) {
        let frames_per_block = self.layout.frames_per_block();
        let mut entries = Vec::with_capacity(self.layout.frame_count as usize);
        'blocks: for block in 0..self.layout.block_count {
            let block_offset = (block * self.layout.block_size) as usize;
            for frame in 0..frames_per_block {
                if entries.len() == self.layout.frame_count as usize {
                    break 'blocks;
                }
                let frame_offset = (frame * self.layout.frame_size) as usize;
                entries.push(Entry {
                    raw: base.add(block_offset + frame_offset),
                    next: entries.len() + 1,
                });
            }
        }
        if let Some(last) = entries.last_mut() {
            last.next = 0;
        }
        self.entries = entries;
        self.cursor = 0;
    }

    /// The entry the cursor points at.
    pub fn cursor_entry(&self) -> Entry {
        self.entries[self.cursor]
    }

    /// Advance the cursor to the next entry in ring order.
    pub fn advance(&mut self) {
        self.cursor = self.entries[self.cursor].next;
    }

    /// Take the cursor entry and advance past it.
    pub fn take_cursor(&mut self) -> Entry {
        let entry = self.entries[self.cursor];
        self.cursor = entry.next;
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_layout() -> RingLayout {
        // 2 blocks of 4 frames: geometry only, no kernel involved.
        RingLayout {
            frame_size: 2048,
            frame_count: 8,
            block_size: 8192,
            block_count: 2,
        }
    }

    #[test]
    fn test_entries_cover_blocks() {
        let mut backing = vec![0u8; 16384];
        let mut ring = Ring::new(test_layout());
        unsafe { ring.build_entries(backing.as_mut_ptr()) };

        assert_eq!(ring.entries.len(), 8);
        let base = backing.as_mut_ptr() as usize;
        for (i, entry) in ring.entries.iter().enumerate() {
            let block = i / 4;
            let frame = i % 4;
            assert_eq!(entry.raw() as usize, base + block * 8192 + frame * 2048);
        }
    }

    #[test]
    fn test_ring_is_circular() {
        let mut backing = vec![0u8; 16384];
        let mut ring = Ring::new(test_layout());
        unsafe { ring.build_entries(backing.as_mut_ptr()) };

        let first = ring.cursor_entry().raw();
        for _ in 0..8 {
            ring.advance();
        }
        assert_eq!(ring.cursor_entry().raw(), first);
    }

    #[test]
    fn test_status_handoff() {
        let mut backing = vec![0u8; 16384];
        let mut ring = Ring::new(test_layout());
        unsafe { ring.build_entries(backing.as_mut_ptr()) };

        let entry = ring.take_cursor();
        assert_eq!(entry.status(), tpacket::TP_STATUS_KERNEL);
        entry.set_status(tpacket::TP_STATUS_USER);
        assert_eq!(entry.status(), tpacket::TP_STATUS_USER);
        entry.set_status(tpacket::TP_STATUS_KERNEL);
        assert_eq!(entry.status(), tpacket::TP_STATUS_KERNEL);
        // take_cursor advanced to the second slot.
        assert_ne!(ring.cursor_entry().raw(), entry.raw());
    }
}
