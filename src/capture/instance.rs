//! One bound interface: socket, negotiated ring protocol, mapped rings and
//! the injection address template.

use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

use tracing::debug;

use super::socket;
use crate::config::FanoutConfig;
use crate::ethernet::{self, VLAN_TAG_LEN};
use crate::ring::tpacket::{self, TP_STATUS_AVAILABLE, TP_STATUS_SEND_REQUEST};
use crate::ring::{Ring, RingKind, RingLayout, DEFAULT_ORDER};
use crate::{Error, Result};

/// A kernel packet socket bound to one NIC, with its RX ring (and TX ring
/// when bridged) mapped into the process.
///
/// Created unprivileged with the name resolved to an ifindex; the socket and
/// rings come to life in [`Instance::open`] and die in [`Instance::close`],
/// which may be called repeatedly.
pub struct Instance {
    name: String,
    index: i32,
    fd: RawFd,
    tp_hdrlen: u32,
    map: *mut u8,
    map_len: usize,
    rx_ring: Option<Ring>,
    tx_ring: Option<Ring>,
    peer: Option<usize>,
    sll: libc::sockaddr_ll,
}

// The mapping and rings are exclusively owned; nothing is shared except the
// kernel's side of the ring protocol.
unsafe impl Send for Instance {}

impl Instance {
    /// Record an interface by name, resolving its kernel index. No socket is
    /// opened yet.
    pub fn new(name: &str, peer: Option<usize>) -> Result<Instance> {
        let index = socket::interface_index(name)?;
        let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        sll.sll_ifindex = index;

        Ok(Instance {
            name: name.to_string(),
            index,
            fd: -1,
            tp_hdrlen: 0,
            map: ptr::null_mut(),
            map_len: 0,
            rx_ring: None,
            tx_ring: None,
            peer,
            sll,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> Option<usize> {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub fn rx_ring(&self) -> Option<&Ring> {
        self.rx_ring.as_ref()
    }

    pub fn rx_ring_mut(&mut self) -> Option<&mut Ring> {
        self.rx_ring.as_mut()
    }

    /// Bring the interface up: bind, go promiscuous, negotiate TPACKET_V2,
    /// fabricate and map the rings, and join the fanout group if one is
    /// configured. On failure the instance is left closed.
    pub fn open(
        &mut self,
        snaplen: u32,
        ring_budget: u32,
        fanout: Option<&FanoutConfig>,
    ) -> Result<()> {
        if self.is_open() {
            return Err(Error::State(format!(
                "interface {} is already started",
                self.name
            )));
        }
        if let Err(e) = self.open_inner(snaplen, ring_budget, fanout) {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn open_inner(
        &mut self,
        snaplen: u32,
        ring_budget: u32,
        fanout: Option<&FanoutConfig>,
    ) -> Result<()> {
        self.fd = socket::packet_socket()?;

        // Re-resolve in case the device set changed since initialization.
        self.index = socket::interface_index(&self.name)?;
        self.sll.sll_ifindex = self.index;

        socket::bind_interface(self.fd, self.index)?;
        socket::enable_promiscuous(self.fd, self.index)?;

        let arptype = socket::hardware_type(self.fd, &self.name)?;
        if arptype != i32::from(libc::ARPHRD_ETHER) {
            return Err(Error::Config(format!(
                "invalid interface type for device {}: {} != {}",
                self.name,
                arptype,
                libc::ARPHRD_ETHER
            )));
        }

        self.tp_hdrlen = socket::tpacket_hdrlen(self.fd)?;
        socket::set_tpacket_v2(self.fd)?;
        socket::set_reserve(self.fd, VLAN_TAG_LEN as u32)?;
        debug!(
            device = %self.name,
            hdrlen = self.tp_hdrlen,
            "negotiated TPACKET_V2"
        );

        self.rx_ring = Some(self.create_ring(RingKind::Rx, snaplen, ring_budget)?);
        if self.peer.is_some() {
            self.tx_ring = Some(self.create_ring(RingKind::Tx, snaplen, ring_budget)?);
        }
        self.map_rings()?;

        if let Some(fanout) = fanout {
            socket::set_fanout(self.fd, fanout.sockopt_arg(self.index))?;
        }

        Ok(())
    }

    /// Negotiate one ring with the kernel, walking the block allocation
    /// order down from [`DEFAULT_ORDER`] while the kernel reports ENOMEM
    /// (or the budget cannot fill a block at the current order).
    fn create_ring(&mut self, kind: RingKind, snaplen: u32, budget: u32) -> Result<Ring> {
        for order in (0..=DEFAULT_ORDER).rev() {
            let layout = RingLayout::plan(snaplen, budget, self.tp_hdrlen, order)?;
            if layout.block_count == 0 {
                debug!(
                    device = %self.name,
                    order,
                    "budget below one block at this order, retrying smaller"
                );
                continue;
            }
            match socket::request_ring(self.fd, kind, &layout.as_req()) {
                Ok(()) => {
                    debug!(
                        device = %self.name,
                        ?kind,
                        order,
                        frame_size = layout.frame_size,
                        frames = layout.frame_count,
                        block_size = layout.block_size,
                        blocks = layout.block_count,
                        size = layout.total_size(),
                        "created kernel ring"
                    );
                    return Ok(Ring::new(layout));
                }
                Err(Error::NoMemory(_)) => {
                    debug!(
                        device = %self.name,
                        order,
                        "kernel ring allocation failed, retrying smaller"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::NoMemory(format!(
            "couldn't allocate enough memory for the {} kernel packet ring",
            self.name
        )))
    }

    /// Map both rings with a single shared mapping (RX at offset 0, TX right
    /// behind it) and build the userspace entry sequences over it.
    fn map_rings(&mut self) -> Result<()> {
        let rx_size = self.rx_ring.as_ref().map_or(0, |r| r.size()) as usize;
        let tx_size = self.tx_ring.as_ref().map_or(0, |r| r.size()) as usize;
        let len = rx_size + tx_size;

        let base = socket::map_ring(self.fd, len)?;
        self.map = base;
        self.map_len = len;

        if let Some(rx) = self.rx_ring.as_mut() {
            unsafe { rx.build_entries(base) };
        }
        if let Some(tx) = self.tx_ring.as_mut() {
            unsafe { tx.build_entries(base.add(rx_size)) };
        }
        Ok(())
    }

    /// Release everything in reverse order of acquisition: entry arrays,
    /// mapping, kernel rings, socket. Safe to call at any stage, repeatedly.
    pub fn close(&mut self) {
        self.rx_ring = None;
        self.tx_ring = None;
        if !self.map.is_null() {
            socket::unmap_ring(self.map, self.map_len);
            self.map = ptr::null_mut();
            self.map_len = 0;
        }
        if self.fd >= 0 {
            socket::release_ring(self.fd, RingKind::Rx);
            socket::release_ring(self.fd, RingKind::Tx);
            socket::close(self.fd);
            self.fd = -1;
        }
    }

    /// Queue one frame for transmission.
    ///
    /// With a TX ring, the frame is copied into the cursor slot and handed to
    /// the kernel with a zero-byte send kick; a slot still owned by the
    /// kernel yields [`Error::TxAgain`]. Without one, the frame goes out via
    /// `sendto` with the instance's address template, stamped with the
    /// frame's own Ethertype.
    pub fn transmit(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::State(format!(
                "interface {} is not started",
                self.name
            )));
        }
        if let Some(ring) = self.tx_ring.as_mut() {
            let entry = ring.cursor_entry();
            if entry.status() != TP_STATUS_AVAILABLE {
                return Err(Error::TxAgain);
            }
            let offset = tpacket::align(self.tp_hdrlen as usize);
            let capacity = (ring.layout().frame_size as usize).saturating_sub(offset);
            if data.len() > capacity {
                return Err(Error::Config(format!(
                    "frame of {} bytes exceeds the {} byte TX slot",
                    data.len(),
                    capacity
                )));
            }
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), entry.raw().add(offset), data.len());
            }
            entry.set_tx_len(data.len() as u32);
            entry.set_status(TP_STATUS_SEND_REQUEST);
            socket::send_kick(self.fd)?;
            ring.advance();
            Ok(())
        } else {
            let Some(proto) = ethernet::ethertype(data) else {
                return Err(Error::Config(format!(
                    "frame of {} bytes is too short to transmit",
                    data.len()
                )));
            };
            self.sll.sll_protocol = proto.to_be();
            socket::send_to(self.fd, data, &self.sll)
        }
    }

    /// Drain the kernel's packet/drop counters for this instance.
    pub fn kernel_stats(&self) -> Result<tpacket::TpacketStats> {
        socket::kernel_stats(self.fd)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.close();
    }
}
