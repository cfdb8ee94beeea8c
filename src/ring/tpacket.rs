//! TPACKET_V2 kernel ABI: ring request/header/stats structures, status bits
//! and socket options, as defined by `<linux/if_packet.h>`.

/// Alignment unit for frame headers and payload offsets.
pub const TPACKET_ALIGNMENT: usize = 16;

/// Ring protocol version negotiated via PACKET_VERSION.
pub const TPACKET_V2: libc::c_int = 1;

// SOL_PACKET socket options used by the ring lifecycle.
pub const PACKET_RX_RING: libc::c_int = 5;
pub const PACKET_STATISTICS: libc::c_int = 6;
pub const PACKET_VERSION: libc::c_int = 10;
pub const PACKET_HDRLEN: libc::c_int = 11;
pub const PACKET_RESERVE: libc::c_int = 12;
pub const PACKET_TX_RING: libc::c_int = 13;
pub const PACKET_FANOUT: libc::c_int = 18;

// Fanout group types and flags (high half of the PACKET_FANOUT argument).
pub const PACKET_FANOUT_HASH: u16 = 0;
pub const PACKET_FANOUT_LB: u16 = 1;
pub const PACKET_FANOUT_CPU: u16 = 2;
pub const PACKET_FANOUT_ROLLOVER: u16 = 3;
pub const PACKET_FANOUT_RND: u16 = 4;
pub const PACKET_FANOUT_QM: u16 = 5;
pub const PACKET_FANOUT_FLAG_ROLLOVER: u16 = 0x1000;
pub const PACKET_FANOUT_FLAG_DEFRAG: u16 = 0x8000;

// RX frame ownership and metadata-validity bits.
pub const TP_STATUS_KERNEL: u32 = 0;
pub const TP_STATUS_USER: u32 = 1 << 0;
pub const TP_STATUS_VLAN_VALID: u32 = 1 << 4;
pub const TP_STATUS_VLAN_TPID_VALID: u32 = 1 << 6;

// TX frame handoff bits.
pub const TP_STATUS_AVAILABLE: u32 = 0;
pub const TP_STATUS_SEND_REQUEST: u32 = 1 << 0;

/// Round `len` up to the kernel's TPACKET alignment.
pub const fn align(len: usize) -> usize {
    (len + TPACKET_ALIGNMENT - 1) & !(TPACKET_ALIGNMENT - 1)
}

/// Ring geometry handed to PACKET_RX_RING / PACKET_TX_RING.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TpacketReq {
    pub tp_block_size: u32,
    pub tp_block_nr: u32,
    pub tp_frame_size: u32,
    pub tp_frame_nr: u32,
}

/// Per-frame header at the start of every ring slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Tpacket2Hdr {
    pub tp_status: u32,
    pub tp_len: u32,
    pub tp_snaplen: u32,
    pub tp_mac: u16,
    pub tp_net: u16,
    pub tp_sec: u32,
    pub tp_nsec: u32,
    pub tp_vlan_tci: u16,
    pub tp_vlan_tpid: u16,
    pub tp_padding: [u8; 4],
}

/// Counters returned (and reset) by PACKET_STATISTICS.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TpacketStats {
    pub tp_packets: u32,
    pub tp_drops: u32,
}

// These must match the kernel ABI byte for byte.
const _: () = assert!(std::mem::size_of::<TpacketReq>() == 16);
const _: () = assert!(std::mem::size_of::<Tpacket2Hdr>() == 32);
const _: () = assert!(std::mem::size_of::<TpacketStats>() == 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 16);
        assert_eq!(align(16), 16);
        assert_eq!(align(17), 32);
        assert_eq!(align(32), 32);
    }

    #[test]
    fn test_status_bits_disjoint() {
        assert_eq!(TP_STATUS_KERNEL, 0);
        assert_ne!(TP_STATUS_USER & TP_STATUS_VLAN_VALID, TP_STATUS_USER);
        assert_ne!(TP_STATUS_VLAN_VALID, TP_STATUS_VLAN_TPID_VALID);
    }
}
