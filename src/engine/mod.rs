//! The capture/forward engine.
//!
//! A [`Context`] drives one session: it owns the interface instances parsed
//! from the device specification, loans received packets to the host one at
//! a time, and forwards pass-verdict packets between bridged peers. The
//! engine is single-threaded and blocking; the only suspension point is the
//! poll wait, and [`BreakHandle`] gives other threads a cooperative way out.

mod message;
mod stats;

pub use message::{MsgHandle, PktHdr, Recv, Verdict, MAX_VERDICT};
pub use stats::Stats;

use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::capture::{socket, Instance};
use crate::config::{parse_device_spec, Config};
use crate::ethernet::{reinsert_vlan_tag, ETH_P_8021Q, VLAN_OFFSET, VLAN_TAG_LEN};
use crate::filter::FilterProgram;
use crate::ring::tpacket::{
    TP_STATUS_KERNEL, TP_STATUS_USER, TP_STATUS_VLAN_TPID_VALID, TP_STATUS_VLAN_VALID,
};
use crate::ring::Entry;
use crate::{caps, Error, Result, DATALINK_EN10MB};

/// Lifecycle of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

/// Cloneable handle that interrupts a blocked receive loop from another
/// thread.
#[derive(Debug, Clone)]
pub struct BreakHandle(Arc<AtomicBool>);

impl BreakHandle {
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// The packet currently loaned to the host.
#[derive(Debug)]
struct PacketDesc {
    instance: usize,
    entry: Entry,
    data: *const u8,
    length: u32,
    hdr: PktHdr,
    seq: u64,
}

/// A ready ring entry located by the round-robin scan.
struct Found {
    instance: usize,
    entry: Entry,
    frame_size: u32,
}

enum Wait {
    Ready,
    Timeout,
    Interrupted,
}

/// One capture/forward session over a set of interfaces.
pub struct Context {
    config: Config,
    /// Per-ring byte budget: the configured total split across all rings.
    ring_budget: u32,
    instances: Vec<Instance>,
    filter: Option<FilterProgram>,
    break_loop: Arc<AtomicBool>,
    stats: Stats,
    state: State,
    /// Round-robin origin: the instance that yielded most recently.
    curr: usize,
    loan: Option<PacketDesc>,
    next_seq: u64,
    last_error: String,
}

impl Context {
    /// Initialize a session from a resolved configuration: parse the device
    /// specification, resolve every interface, pair bridge peers, and split
    /// the memory budget across the rings the topology implies.
    pub fn new(config: Config) -> Result<Context> {
        let specs = parse_device_spec(&config.device, config.mode)?;

        let mut instances = Vec::with_capacity(specs.len());
        for spec in &specs {
            instances.push(Instance::new(&spec.name, spec.peer)?);
        }

        // One ring per passive instance, two per bridged one.
        let ring_count: u64 = instances
            .iter()
            .map(|i| if i.peer().is_some() { 2 } else { 1 })
            .sum();
        let ring_budget = (config.buffer_bytes / ring_count).min(u64::from(u32::MAX)) as u32;

        Ok(Context {
            config,
            ring_budget,
            instances,
            filter: None,
            break_loop: Arc::new(AtomicBool::new(false)),
            stats: Stats::default(),
            state: State::Initialized,
            curr: 0,
            loan: None,
            next_seq: 0,
            last_error: String::new(),
        })
    }

    /// Compile and install a BPF filter expression. The previous program
    /// stays installed if compilation fails.
    pub fn set_filter(&mut self, expr: &str) -> Result<()> {
        match FilterProgram::compile(self.config.snaplen, expr) {
            Ok(program) => {
                self.filter = Some(program);
                Ok(())
            }
            Err(e) => Err(self.record(e)),
        }
    }

    /// The installed filter expression, if any.
    pub fn filter_expression(&self) -> Option<&str> {
        self.filter.as_ref().map(|f| f.expression())
    }

    /// Bring every interface up and transition to [`State::Started`]. On
    /// failure all partially started instances are released again.
    pub fn start(&mut self) -> Result<()> {
        if self.state == State::Started {
            return Err(self.record(Error::State("context is already started".to_string())));
        }
        for i in 0..self.instances.len() {
            let result = self.instances[i].open(
                self.config.snaplen,
                self.ring_budget,
                self.config.fanout.as_ref(),
            );
            if let Err(e) = result {
                for instance in &mut self.instances {
                    instance.close();
                }
                return Err(self.record(e));
            }
        }
        self.stats.reset(&self.instances);
        self.break_loop.store(false, Ordering::Release);
        self.state = State::Started;
        debug!(
            device = %self.config.device,
            interfaces = self.instances.len(),
            ring_budget = self.ring_budget,
            "session started"
        );
        Ok(())
    }

    /// Tear the session down: cache the final kernel counters, drop any
    /// outstanding loan, and release every instance.
    pub fn stop(&mut self) {
        if self.state == State::Started {
            self.stats.accumulate_hw(&self.instances);
        }
        self.loan = None;
        for instance in &mut self.instances {
            instance.close();
        }
        self.state = State::Stopped;
    }

    /// Stop and consume the context.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Request that a blocked or future receive call return without a
    /// message.
    pub fn breakloop(&self) {
        self.break_loop.store(true, Ordering::Release);
    }

    /// A handle other threads can use to interrupt the receive loop.
    pub fn break_handle(&self) -> BreakHandle {
        BreakHandle(Arc::clone(&self.break_loop))
    }

    /// Receive the next packet message.
    ///
    /// Scans the instances round-robin starting after the previous winner;
    /// when every ring is empty, polls all sockets with the configured
    /// timeout. Packets consumed by the filter are forwarded to the bridge
    /// peer (best effort) and never surface. The returned handle must be
    /// passed to [`Context::msg_finalize`] before the next receive.
    pub fn msg_receive(&mut self) -> Result<Recv> {
        if self.state != State::Started {
            return Err(self.record(Error::State("context is not started".to_string())));
        }
        if self.loan.is_some() {
            return Err(self.record(Error::State(
                "previous message has not been finalized".to_string(),
            )));
        }

        loop {
            if self.break_loop.load(Ordering::Acquire) {
                return Ok(Recv::BreakLoop);
            }

            let Some(found) = self.find_packet() else {
                match self.wait_for_packet()? {
                    Wait::Ready => continue,
                    Wait::Timeout => return Ok(Recv::Timeout),
                    Wait::Interrupted => {
                        return Ok(if self.break_loop.load(Ordering::Acquire) {
                            Recv::BreakLoop
                        } else {
                            Recv::Interrupted
                        });
                    }
                }
            };

            let Found {
                instance: idx,
                entry,
                frame_size,
            } = found;
            let hdr = entry.header();
            let tp_mac = u32::from(hdr.tp_mac);
            let mut tp_snaplen = hdr.tp_snaplen;
            let mut tp_len = hdr.tp_len;

            if u64::from(tp_mac) + u64::from(tp_snaplen) > u64::from(frame_size) {
                return Err(self.record(Error::CorruptFrame {
                    mac: tp_mac,
                    caplen: tp_snaplen,
                    frame_size,
                }));
            }

            let mut data = unsafe { entry.raw().add(tp_mac as usize) } as *const u8;

            // Reconstruct a NIC-stripped VLAN tag in place, using the
            // headroom PACKET_RESERVE set aside in front of the frame.
            let vlan_present =
                hdr.tp_vlan_tci != 0 || hdr.tp_status & TP_STATUS_VLAN_VALID != 0;
            if vlan_present
                && tp_snaplen as usize >= VLAN_OFFSET
                && tp_mac as usize >= VLAN_TAG_LEN
            {
                let tpid = if hdr.tp_vlan_tpid != 0
                    && hdr.tp_status & TP_STATUS_VLAN_TPID_VALID != 0
                {
                    hdr.tp_vlan_tpid
                } else {
                    ETH_P_8021Q
                };
                unsafe {
                    let scratch = slice::from_raw_parts_mut(
                        entry.raw().add(tp_mac as usize - VLAN_TAG_LEN),
                        VLAN_TAG_LEN + VLAN_OFFSET,
                    );
                    reinsert_vlan_tag(scratch, tpid, hdr.tp_vlan_tci);
                    data = data.sub(VLAN_TAG_LEN);
                }
                tp_snaplen += VLAN_TAG_LEN as u32;
                tp_len += VLAN_TAG_LEN as u32;
            }

            // A filter miss never reaches the host: forward in-line traffic
            // to the peer and hand the slot straight back to the kernel.
            if let Some(program) = &self.filter {
                let frame = unsafe { slice::from_raw_parts(data, tp_snaplen as usize) };
                if !program.matches(frame, tp_len) {
                    self.stats.packets_filtered += 1;
                    if let Some(peer) = self.instances[idx].peer() {
                        if let Err(e) = self.instances[peer].transmit(frame) {
                            debug!(error = %e, "forwarding filtered packet failed");
                        }
                    }
                    entry.set_status(TP_STATUS_KERNEL);
                    continue;
                }
            }

            let ingress_index = self.instances[idx].index();
            let egress_index = self.instances[idx]
                .peer()
                .map(|p| self.instances[p].index())
                .unwrap_or(PktHdr::UNKNOWN_INDEX);

            self.next_seq += 1;
            let handle = MsgHandle { seq: self.next_seq };
            self.loan = Some(PacketDesc {
                instance: idx,
                entry,
                data,
                length: tp_snaplen,
                hdr: PktHdr {
                    ts_sec: hdr.tp_sec,
                    ts_usec: hdr.tp_nsec / 1000,
                    caplen: tp_snaplen,
                    pktlen: tp_len,
                    ingress_index,
                    egress_index,
                },
                seq: self.next_seq,
            });
            return Ok(Recv::Packet(handle));
        }
    }

    /// Render a verdict on the loaned message: count it, forward pass
    /// verdicts to the bridge peer (best effort), and hand the ring slot
    /// back to the kernel.
    pub fn msg_finalize(&mut self, msg: MsgHandle, verdict: Verdict) -> Result<()> {
        let desc = match self.loan.take() {
            Some(desc) if desc.seq == msg.seq => desc,
            other => {
                self.loan = other;
                return Err(self.record(Error::State(
                    "message is not the outstanding loan".to_string(),
                )));
            }
        };

        self.stats.verdicts[verdict as usize] += 1;
        if verdict.translate() == Verdict::Pass {
            if let Some(peer) = self.instances[desc.instance].peer() {
                let frame = unsafe { slice::from_raw_parts(desc.data, desc.length as usize) };
                if let Err(e) = self.instances[peer].transmit(frame) {
                    debug!(error = %e, "forwarding finalized packet failed");
                }
            }
        }
        desc.entry.set_status(TP_STATUS_KERNEL);
        Ok(())
    }

    /// Frame bytes of the loaned message.
    pub fn packet_data(&self, msg: &MsgHandle) -> Result<&[u8]> {
        match &self.loan {
            Some(desc) if desc.seq == msg.seq => {
                Ok(unsafe { slice::from_raw_parts(desc.data, desc.length as usize) })
            }
            _ => Err(Error::State(
                "message is not the outstanding loan".to_string(),
            )),
        }
    }

    /// Header of the loaned message.
    pub fn packet_header(&self, msg: &MsgHandle) -> Result<&PktHdr> {
        match &self.loan {
            Some(desc) if desc.seq == msg.seq => Ok(&desc.hdr),
            _ => Err(Error::State(
                "message is not the outstanding loan".to_string(),
            )),
        }
    }

    /// Transmit a packet out of the interface it arrived on (`reverse`) or
    /// its bridge peer.
    pub fn inject(&mut self, hdr: &PktHdr, data: &[u8], reverse: bool) -> Result<()> {
        if self.state != State::Started {
            return Err(self.record(Error::State("context is not started".to_string())));
        }
        let ingress = self
            .instances
            .iter()
            .position(|i| i.index() == hdr.ingress_index);
        let egress = match ingress {
            Some(i) if reverse => i,
            Some(i) => match self.instances[i].peer() {
                Some(peer) => peer,
                None => {
                    return Err(self.record(Error::NoDevice {
                        name: format!("peer of ifindex {}", hdr.ingress_index),
                    }))
                }
            },
            None => {
                return Err(self.record(Error::NoDevice {
                    name: format!("ifindex {}", hdr.ingress_index),
                }))
            }
        };
        if let Err(e) = self.instances[egress].transmit(data) {
            return Err(self.record(e));
        }
        self.stats.packets_injected += 1;
        Ok(())
    }

    /// Session statistics, folding in the kernel counters when running.
    pub fn get_stats(&mut self) -> &Stats {
        if self.state == State::Started {
            self.stats.accumulate_hw(&self.instances);
        }
        &self.stats
    }

    /// Zero all counters, including the kernel's.
    pub fn reset_stats(&mut self) {
        self.stats.reset(&self.instances);
    }

    pub fn check_status(&self) -> State {
        self.state
    }

    pub fn snaplen(&self) -> u32 {
        self.config.snaplen
    }

    /// Per-ring byte budget derived from the configured total.
    pub fn ring_budget(&self) -> u32 {
        self.ring_budget
    }

    pub fn interface_count(&self) -> usize {
        self.instances.len()
    }

    pub fn capabilities(&self) -> u32 {
        caps::BLOCK
            | caps::REPLACE
            | caps::INJECT
            | caps::UNPRIV_START
            | caps::BREAKLOOP
            | caps::BPF
            | caps::DEVICE_INDEX
    }

    pub fn datalink_type(&self) -> i32 {
        DATALINK_EN10MB
    }

    /// Kernel index of a session interface by name.
    pub fn device_index(&self, device: &str) -> Result<i32> {
        self.instances
            .iter()
            .find(|i| i.name() == device)
            .map(|i| i.index())
            .ok_or_else(|| Error::NoDevice {
                name: device.to_string(),
            })
    }

    /// The most recent error message recorded by this context.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Overwrite the recorded error message (hosts annotate failures).
    pub fn set_last_error(&mut self, message: &str) {
        self.last_error = message.chars().take(256).collect();
    }

    /// Round-robin scan for a ready RX entry, starting after the previous
    /// winner and recording the new one as the next scan's origin.
    fn find_packet(&mut self) -> Option<Found> {
        let count = self.instances.len();
        let origin = self.curr;
        let mut i = origin;
        loop {
            i = (i + 1) % count;
            if let Some(ring) = self.instances[i].rx_ring_mut() {
                if ring.cursor_entry().status() & TP_STATUS_USER != 0 {
                    let frame_size = ring.layout().frame_size;
                    let entry = ring.take_cursor();
                    self.curr = i;
                    return Some(Found {
                        instance: i,
                        entry,
                        frame_size,
                    });
                }
            }
            if i == origin {
                return None;
            }
        }
    }

    /// Block until any instance signals readable, the timeout elapses, or a
    /// signal arrives. Error conditions on any socket are fatal.
    fn wait_for_packet(&mut self) -> Result<Wait> {
        let mut fds: Vec<libc::pollfd> = self
            .instances
            .iter()
            .map(|instance| libc::pollfd {
                fd: instance.fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        match socket::poll(&mut fds, self.config.timeout_ms) {
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => Ok(Wait::Interrupted),
            Err(e) => Err(self.record(Error::Os {
                op: "poll",
                source: e,
            })),
            Ok(0) => Ok(Wait::Timeout),
            Ok(_) => {
                for pfd in &fds {
                    let bad =
                        libc::POLLHUP | libc::POLLRDHUP | libc::POLLERR | libc::POLLNVAL;
                    if pfd.revents & bad != 0 {
                        let what = if pfd.revents & (libc::POLLHUP | libc::POLLRDHUP) != 0 {
                            "hang-up on a packet socket"
                        } else if pfd.revents & libc::POLLERR != 0 {
                            "error condition on a packet socket"
                        } else {
                            "invalid polling request on a packet socket"
                        };
                        return Err(self.record(Error::Os {
                            op: "poll",
                            source: std::io::Error::new(std::io::ErrorKind::Other, what),
                        }));
                    }
                }
                Ok(Wait::Ready)
            }
        }
    }

    /// Keep the bounded last-error message in sync with a returned error.
    fn record(&mut self, e: Error) -> Error {
        self.last_error = e.to_string().chars().take(256).collect();
        e
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, Options};

    fn passive_lo() -> Context {
        let config = Options::new("lo", Mode::Passive).resolve().unwrap();
        Context::new(config).unwrap()
    }

    #[test]
    fn test_initialize_resolves_interfaces() {
        let ctx = passive_lo();
        assert_eq!(ctx.check_status(), State::Initialized);
        assert_eq!(ctx.interface_count(), 1);
        assert!(ctx.device_index("lo").unwrap() > 0);
    }

    #[test]
    fn test_device_index_unknown() {
        let ctx = passive_lo();
        assert!(matches!(
            ctx.device_index("definitely-not-a-nic"),
            Err(Error::NoDevice { .. })
        ));
    }

    #[test]
    fn test_initialize_unknown_interface() {
        let config = Options::new("definitely-not-a-nic", Mode::Passive)
            .resolve()
            .unwrap();
        assert!(matches!(
            Context::new(config),
            Err(Error::NoDevice { .. })
        ));
    }

    #[test]
    fn test_initialize_bad_spec() {
        let config = Options::new(":lo", Mode::Passive).resolve().unwrap();
        assert!(matches!(Context::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_inline_requires_pairs() {
        let config = Options::new("lo", Mode::Inline).resolve().unwrap();
        assert!(Context::new(config).is_err());
    }

    #[test]
    fn test_ring_budget_split() {
        let mut options = Options::new("lo:lo", Mode::Passive);
        options
            .apply_variable("buffer_size_mb", Some("128"))
            .unwrap();
        let ctx = Context::new(options.resolve().unwrap()).unwrap();
        // Two passive instances mean two RX rings sharing the budget.
        assert_eq!(ctx.ring_budget(), 64 * 1024 * 1024);
    }

    #[test]
    fn test_set_filter_commits_only_on_success() {
        let mut ctx = passive_lo();
        ctx.set_filter("udp").unwrap();
        assert_eq!(ctx.filter_expression(), Some("udp"));

        assert!(ctx.set_filter("not a filter ((").is_err());
        assert_eq!(ctx.filter_expression(), Some("udp"));
        assert!(!ctx.last_error().is_empty());
    }

    #[test]
    fn test_receive_requires_start() {
        let mut ctx = passive_lo();
        assert!(matches!(ctx.msg_receive(), Err(Error::State(_))));
    }

    #[test]
    fn test_finalize_without_loan() {
        let mut ctx = passive_lo();
        let bogus = MsgHandle { seq: 42 };
        assert!(matches!(
            ctx.msg_finalize(bogus, Verdict::Pass),
            Err(Error::State(_))
        ));
        assert!(ctx.packet_data(&bogus).is_err());
        assert!(ctx.packet_header(&bogus).is_err());
    }

    #[test]
    fn test_inject_requires_start() {
        let mut ctx = passive_lo();
        let hdr = PktHdr {
            ts_sec: 0,
            ts_usec: 0,
            caplen: 0,
            pktlen: 0,
            ingress_index: 1,
            egress_index: PktHdr::UNKNOWN_INDEX,
        };
        assert!(matches!(
            ctx.inject(&hdr, &[0u8; 64], true),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn test_stats_start_at_zero() {
        let mut ctx = passive_lo();
        let stats = ctx.get_stats().clone();
        assert_eq!(stats, Stats::default());
    }

    #[test]
    fn test_capabilities() {
        let ctx = passive_lo();
        let capabilities = ctx.capabilities();
        for bit in [
            caps::BLOCK,
            caps::REPLACE,
            caps::INJECT,
            caps::UNPRIV_START,
            caps::BREAKLOOP,
            caps::BPF,
            caps::DEVICE_INDEX,
        ] {
            assert_eq!(capabilities & bit, bit);
        }
        assert_eq!(ctx.datalink_type(), DATALINK_EN10MB);
    }

    #[test]
    fn test_stop_from_initialized() {
        let mut ctx = passive_lo();
        ctx.stop();
        assert_eq!(ctx.check_status(), State::Stopped);
    }

    #[test]
    fn test_last_error_is_bounded() {
        let mut ctx = passive_lo();
        let long = "x".repeat(1000);
        ctx.set_last_error(&long);
        assert_eq!(ctx.last_error().len(), 256);
    }
}
