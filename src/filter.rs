//! BPF filter boundary.
//!
//! Compilation and evaluation are delegated to libpcap through the `pcap`
//! crate; the engine only sees compile-then-match. A program is committed by
//! the caller only after compilation succeeds, so a bad expression never
//! disturbs an installed filter.

use crate::{Error, Result};

pub struct FilterProgram {
    expr: String,
    program: pcap::BpfProgram,
}

impl FilterProgram {
    /// Compile a textual filter expression against the Ethernet link type.
    ///
    /// `snaplen` is advisory; libpcap compiles dead handles at its default
    /// snap length.
    pub fn compile(_snaplen: u32, expr: &str) -> Result<FilterProgram> {
        let cap = pcap::Capture::dead(pcap::Linktype::ETHERNET)
            .map_err(|e| Error::Filter(e.to_string()))?;
        let program = cap
            .compile(expr, true)
            .map_err(|e| Error::Filter(format!("compilation of '{expr}' failed: {e}")))?;
        Ok(FilterProgram {
            expr: expr.to_string(),
            program,
        })
    }

    /// Run the program over a captured frame. Returns false when the frame
    /// should be dropped (and, in-line, forwarded without host inspection).
    pub fn matches(&self, data: &[u8], _wire_len: u32) -> bool {
        self.program.filter(data)
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }
}

impl std::fmt::Debug for FilterProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterProgram")
            .field("expr", &self.expr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A minimal UDP packet: Ethernet + IPv4 + UDP header.
    fn udp_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 14 + 20 + 8];
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        frame[14] = 0x45; // IHL 5
        frame[23] = 17; // protocol UDP
        frame
    }

    #[test]
    fn test_compile_and_match() {
        let prog = FilterProgram::compile(1518, "udp").unwrap();
        assert_eq!(prog.expression(), "udp");

        let udp = udp_frame();
        assert!(prog.matches(&udp, udp.len() as u32));

        let mut tcp = udp_frame();
        tcp[23] = 6;
        assert!(!prog.matches(&tcp, tcp.len() as u32));
    }

    #[test]
    fn test_bad_expression() {
        let err = FilterProgram::compile(1518, "not a valid bpf ((").unwrap_err();
        assert!(matches!(err, Error::Filter(_)));
    }
}
