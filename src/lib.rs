//! ringtap - packet-ring capture and in-line forwarding
//!
//! Sources and sinks raw Layer-2 frames through the Linux AF_PACKET
//! PACKET_MMAP facility (TPACKET_V2) and hands them to a verdict-rendering
//! host one message at a time. Interfaces can run passive (observe only) or
//! be bridged in pairs for in-line forwarding.

pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod ethernet;
pub mod filter;
pub mod ring;
pub mod telemetry;

pub use engine::{BreakHandle, Context, MsgHandle, PktHdr, Recv, State, Verdict};
pub use error::{Error, Result};

/// Module identity advertised to hosts.
pub const MODULE_NAME: &str = "ringtap";
pub const MODULE_VERSION: u32 = 6;

/// Capability bits advertised by [`Context::capabilities`](crate::Context::capabilities).
pub mod caps {
    /// Can drop packets by verdict.
    pub const BLOCK: u32 = 1 << 0;
    /// Can substitute modified packet contents.
    pub const REPLACE: u32 = 1 << 1;
    /// Can inject new packets.
    pub const INJECT: u32 = 1 << 2;
    /// Initialization does not require privileges; only `start` does.
    pub const UNPRIV_START: u32 = 1 << 3;
    /// Supports cooperative loop interruption.
    pub const BREAKLOOP: u32 = 1 << 4;
    /// Supports BPF filter expressions.
    pub const BPF: u32 = 1 << 5;
    /// Reports kernel interface indexes in packet headers.
    pub const DEVICE_INDEX: u32 = 1 << 6;
}

/// The only link type this engine produces: Ethernet (DLT_EN10MB).
pub const DATALINK_EN10MB: i32 = 1;
