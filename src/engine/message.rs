//! Messages, verdicts and packet headers exchanged with the host.

/// Host verdict on one delivered packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Verdict {
    /// Pass the packet.
    Pass = 0,
    /// Block the packet.
    Block = 1,
    /// Pass a packet that has been modified in place.
    Replace = 2,
    /// Pass the packet and ignore the rest of its flow.
    Whitelist = 3,
    /// Block the packet and the rest of its flow.
    Blacklist = 4,
    /// Pass the packet without seeing the rest of its flow.
    Ignore = 5,
    /// Hold the packet briefly and retry it.
    Retry = 6,
}

/// Number of verdict kinds; sizes the per-verdict counters.
pub const MAX_VERDICT: usize = 7;

/// What a verdict means for the forwarding decision.
const TRANSLATION: [Verdict; MAX_VERDICT] = [
    Verdict::Pass,  // Pass
    Verdict::Block, // Block
    Verdict::Pass,  // Replace
    Verdict::Pass,  // Whitelist
    Verdict::Block, // Blacklist
    Verdict::Pass,  // Ignore
    Verdict::Block, // Retry
];

impl Verdict {
    /// Convert a raw verdict index, clamping anything unknown to Pass.
    pub fn from_raw(raw: usize) -> Verdict {
        match raw {
            1 => Verdict::Block,
            2 => Verdict::Replace,
            3 => Verdict::Whitelist,
            4 => Verdict::Blacklist,
            5 => Verdict::Ignore,
            6 => Verdict::Retry,
            _ => Verdict::Pass,
        }
    }

    /// Collapse to the pass/block decision driving peer forwarding.
    pub fn translate(self) -> Verdict {
        TRANSLATION[self as usize]
    }
}

/// Normalized header for one received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PktHdr {
    pub ts_sec: u32,
    pub ts_usec: u32,
    /// Captured bytes, after any VLAN tag reconstruction.
    pub caplen: u32,
    /// Original wire length.
    pub pktlen: u32,
    pub ingress_index: i32,
    pub egress_index: i32,
}

impl PktHdr {
    /// Sentinel for an interface index that is not known (e.g. the egress of
    /// a passive instance).
    pub const UNKNOWN_INDEX: i32 = -1;
}

/// Token for the message currently loaned to the host.
///
/// The engine loans out at most one message at a time; finalizing with a
/// stale or foreign token is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHandle {
    pub(super) seq: u64,
}

/// Outcome of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    /// A packet message is ready; read it through the context accessors and
    /// finalize it with a verdict.
    Packet(MsgHandle),
    /// The poll timeout elapsed with no traffic.
    Timeout,
    /// A signal interrupted the wait; the caller decides whether to retry.
    Interrupted,
    /// The break-loop flag was observed; no further messages.
    BreakLoop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_table() {
        assert_eq!(Verdict::Pass.translate(), Verdict::Pass);
        assert_eq!(Verdict::Block.translate(), Verdict::Block);
        assert_eq!(Verdict::Replace.translate(), Verdict::Pass);
        assert_eq!(Verdict::Whitelist.translate(), Verdict::Pass);
        assert_eq!(Verdict::Blacklist.translate(), Verdict::Block);
        assert_eq!(Verdict::Ignore.translate(), Verdict::Pass);
        assert_eq!(Verdict::Retry.translate(), Verdict::Block);
    }

    #[test]
    fn test_from_raw_clamps_unknown() {
        assert_eq!(Verdict::from_raw(0), Verdict::Pass);
        assert_eq!(Verdict::from_raw(4), Verdict::Blacklist);
        assert_eq!(Verdict::from_raw(MAX_VERDICT), Verdict::Pass);
        assert_eq!(Verdict::from_raw(usize::MAX), Verdict::Pass);
    }
}
