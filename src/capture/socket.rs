//! Raw packet-socket plumbing.
//!
//! Thin `Result`-returning wrappers over the libc calls the instance
//! lifecycle needs: socket creation, interface resolution, binding,
//! promiscuous membership, TPACKET negotiation, ring creation, mapping,
//! statistics and transmission.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::ring::tpacket::{self, TpacketReq, TpacketStats};
use crate::ring::RingKind;
use crate::{Error, Result};

/// Open a raw AF_PACKET socket receiving all Ethertypes.
pub fn packet_socket() -> Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW,
            i32::from((libc::ETH_P_ALL as u16).to_be()),
        )
    };
    if fd < 0 {
        return Err(Error::os("socket(AF_PACKET)"));
    }
    Ok(fd)
}

/// Resolve an interface name to its kernel index. Does not need privileges.
pub fn interface_index(name: &str) -> Result<i32> {
    let c_name = CString::new(name).map_err(|_| Error::NoDevice {
        name: name.to_string(),
    })?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(Error::NoDevice {
            name: name.to_string(),
        });
    }
    Ok(index as i32)
}

/// Bind the socket to one interface and surface any pending socket error
/// (e.g. the link being down).
pub fn bind_interface(fd: RawFd, ifindex: i32) -> Result<()> {
    let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
    sll.sll_family = libc::AF_PACKET as u16;
    sll.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
    sll.sll_ifindex = ifindex;

    let rc = unsafe {
        libc::bind(
            fd,
            &sll as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::os("bind"));
    }

    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(Error::os("getsockopt(SO_ERROR)"));
    }
    if err != 0 {
        return Err(Error::Os {
            op: "bind",
            source: io::Error::from_raw_os_error(err),
        });
    }
    Ok(())
}

/// Join the promiscuous membership for the interface.
pub fn enable_promiscuous(fd: RawFd, ifindex: i32) -> Result<()> {
    let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
    mreq.mr_ifindex = ifindex;
    mreq.mr_type = libc::PACKET_MR_PROMISC as u16;
    set_opt(
        fd,
        libc::SOL_PACKET,
        libc::PACKET_ADD_MEMBERSHIP,
        &mreq,
        "setsockopt(PACKET_ADD_MEMBERSHIP)",
    )
}

/// Query the link-layer hardware type (ARPHRD_*).
pub fn hardware_type(fd: RawFd, name: &str) -> Result<i32> {
    let mut ifr = ifreq_for(name)?;
    let rc = unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR, &mut ifr) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENODEV) {
            return Err(Error::NoDevice {
                name: name.to_string(),
            });
        }
        return Err(Error::Os {
            op: "ioctl(SIOCGIFHWADDR)",
            source: err,
        });
    }
    Ok(i32::from(unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_family }))
}

/// TPACKET_V2 per-frame header length as reported by the kernel.
pub fn tpacket_hdrlen(fd: RawFd) -> Result<u32> {
    let mut val: libc::c_int = tpacket::TPACKET_V2;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_PACKET,
            tpacket::PACKET_HDRLEN,
            &mut val as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(Error::os("getsockopt(PACKET_HDRLEN)"));
    }
    Ok(val as u32)
}

/// Switch the socket's ring protocol to TPACKET_V2.
pub fn set_tpacket_v2(fd: RawFd) -> Result<()> {
    set_opt(
        fd,
        libc::SOL_PACKET,
        tpacket::PACKET_VERSION,
        &tpacket::TPACKET_V2,
        "setsockopt(PACKET_VERSION)",
    )
}

/// Reserve per-frame headroom in front of the link header.
pub fn set_reserve(fd: RawFd, bytes: u32) -> Result<()> {
    set_opt(
        fd,
        libc::SOL_PACKET,
        tpacket::PACKET_RESERVE,
        &bytes,
        "setsockopt(PACKET_RESERVE)",
    )
}

/// Ask the kernel to create a ring with the given geometry. Allocation
/// failures come back as [`Error::NoMemory`] so callers can retry with a
/// smaller block order.
pub fn request_ring(fd: RawFd, kind: RingKind, req: &TpacketReq) -> Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            kind.sockopt(),
            req as *const _ as *const libc::c_void,
            mem::size_of::<TpacketReq>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOMEM) {
            return Err(Error::NoMemory(
                "kernel packet ring allocation failed".to_string(),
            ));
        }
        return Err(Error::Os {
            op: "setsockopt(PACKET_RX_RING/PACKET_TX_RING)",
            source: err,
        });
    }
    Ok(())
}

/// Direct the kernel to tear down a ring by requesting zero blocks.
/// Best-effort: teardown proceeds regardless.
pub fn release_ring(fd: RawFd, kind: RingKind) {
    let req = TpacketReq::default();
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_PACKET,
            kind.sockopt(),
            &req as *const _ as *const libc::c_void,
            mem::size_of::<TpacketReq>() as libc::socklen_t,
        );
    }
}

/// Map the socket's rings into userspace (read+write, shared).
pub fn map_ring(fd: RawFd, len: usize) -> Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Error::os("mmap"));
    }
    Ok(ptr as *mut u8)
}

pub fn unmap_ring(base: *mut u8, len: usize) {
    unsafe {
        libc::munmap(base as *mut libc::c_void, len);
    }
}

/// Join a fanout group with a fully formed PACKET_FANOUT argument.
pub fn set_fanout(fd: RawFd, arg: libc::c_int) -> Result<()> {
    set_opt(
        fd,
        libc::SOL_PACKET,
        tpacket::PACKET_FANOUT,
        &arg,
        "setsockopt(PACKET_FANOUT)",
    )
}

/// Read and atomically reset the kernel's packet/drop counters.
pub fn kernel_stats(fd: RawFd) -> Result<TpacketStats> {
    let mut stats = TpacketStats::default();
    let mut len = mem::size_of::<TpacketStats>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_PACKET,
            tpacket::PACKET_STATISTICS,
            &mut stats as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        return Err(Error::os("getsockopt(PACKET_STATISTICS)"));
    }
    Ok(stats)
}

/// Zero-byte send that flushes pending TX-ring frames to the driver.
pub fn send_kick(fd: RawFd) -> Result<()> {
    let rc = unsafe { libc::send(fd, ptr::null(), 0, 0) };
    if rc < 0 {
        return Err(Error::os("send"));
    }
    Ok(())
}

/// Transmit one frame through the socket without a TX ring.
pub fn send_to(fd: RawFd, data: &[u8], sll: &libc::sockaddr_ll) -> Result<()> {
    let rc = unsafe {
        libc::sendto(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0,
            sll as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::os("sendto"));
    }
    Ok(())
}

/// Poll a set of descriptors; the caller interprets readiness and EINTR.
pub fn poll(fds: &mut [libc::pollfd], timeout_ms: libc::c_int) -> io::Result<usize> {
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn set_opt<T>(
    fd: RawFd,
    level: libc::c_int,
    name: libc::c_int,
    value: &T,
    op: &'static str,
) -> Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const _ as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(Error::Os {
            op,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn ifreq_for(name: &str) -> Result<libc::ifreq> {
    let mut ifr: libc::ifreq = unsafe { mem::zeroed() };
    let bytes = name.as_bytes();
    if bytes.len() >= ifr.ifr_name.len() {
        return Err(Error::NoDevice {
            name: name.to_string(),
        });
    }
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}
