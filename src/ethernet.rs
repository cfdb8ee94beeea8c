//! Ethernet framing constants and VLAN tag reconstruction.

/// Octets in a MAC address.
pub const ETH_ALEN: usize = 6;
/// Untagged Ethernet header length.
pub const ETH_HLEN: usize = 14;
/// 802.1Q tag: TPID + TCI.
pub const VLAN_TAG_LEN: usize = 4;
/// Offset of the EtherType/TPID field: destination + source MAC.
pub const VLAN_OFFSET: usize = 2 * ETH_ALEN;
/// Default TPID when the NIC did not report one.
pub const ETH_P_8021Q: u16 = 0x8100;

/// EtherType of an untagged frame, if it is long enough to carry one.
pub fn ethertype(frame: &[u8]) -> Option<u16> {
    if frame.len() < ETH_HLEN {
        return None;
    }
    Some(u16::from_be_bytes([frame[VLAN_OFFSET], frame[VLAN_OFFSET + 1]]))
}

/// Re-insert a VLAN tag the NIC stripped.
///
/// `frame` starts at the 4-byte reserved headroom in front of the received
/// Ethernet header, i.e. `frame[VLAN_TAG_LEN..]` holds the untagged frame.
/// The destination and source MACs are shifted left into the headroom and
/// the tag is written in their wake, both fields in network byte order.
/// Needs at least headroom plus both MACs (`VLAN_TAG_LEN + VLAN_OFFSET`
/// bytes); shorter frames are left untouched.
pub fn reinsert_vlan_tag(frame: &mut [u8], tpid: u16, tci: u16) {
    if frame.len() < VLAN_TAG_LEN + VLAN_OFFSET {
        return;
    }
    frame.copy_within(VLAN_TAG_LEN..VLAN_TAG_LEN + VLAN_OFFSET, 0);
    frame[VLAN_OFFSET..VLAN_OFFSET + 2].copy_from_slice(&tpid.to_be_bytes());
    frame[VLAN_OFFSET + 2..VLAN_OFFSET + 4].copy_from_slice(&tci.to_be_bytes());
}
