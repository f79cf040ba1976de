//! Local interface inspection.
//!
//! Two questions get answered here, both once at startup: where do
//! announcements go (the broadcast address of the first usable IPv4
//! interface), and which addresses are our own (for classifying
//! neighbors as local siblings). Uses `libc::getifaddrs()`.

use std::collections::HashSet;
use std::io;
use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum IfaceError {
    #[error("getifaddrs failed: {0}")]
    Enumerate(#[source] io::Error),

    #[error("no non-loopback IPv4 interface with a broadcast address")]
    NoUsableInterface,
}

/// One IPv4 address record from the kernel's interface list.
struct IfaceAddr {
    ip: Ipv4Addr,
    broadcast: Option<Ipv4Addr>,
    loopback: bool,
}

/// Broadcast address of the first non-loopback IPv4 interface that has
/// one. This is where every announcement datagram is sent.
pub fn broadcast_ipv4() -> Result<Ipv4Addr, IfaceError> {
    enumerate()?
        .into_iter()
        .filter(|a| !a.loopback)
        .find_map(|a| a.broadcast)
        .ok_or(IfaceError::NoUsableInterface)
}

/// Every non-loopback IPv4 address bound on this host. A neighbor whose
/// ip is in this set shares the host with us.
pub fn local_ipv4_set() -> Result<HashSet<Ipv4Addr>, IfaceError> {
    Ok(enumerate()?
        .into_iter()
        .filter(|a| !a.loopback)
        .map(|a| a.ip)
        .collect())
}

fn enumerate() -> Result<Vec<IfaceAddr>, IfaceError> {
    let mut result = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(&mut ifaddrs) != 0 {
            return Err(IfaceError::Enumerate(io::Error::last_os_error()));
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            current = ifa.ifa_next;

            if ifa.ifa_addr.is_null() {
                continue;
            }
            if (*ifa.ifa_addr).sa_family as i32 != libc::AF_INET {
                continue;
            }

            let ip = match sockaddr_ipv4(ifa.ifa_addr) {
                Some(ip) => ip,
                None => continue,
            };

            let loopback = ifa.ifa_flags & libc::IFF_LOOPBACK as libc::c_uint != 0;
            let broadcast = if ifa.ifa_flags & libc::IFF_BROADCAST as libc::c_uint != 0 {
                sockaddr_ipv4(broadcast_sockaddr(ifa))
            } else {
                None
            };

            result.push(IfaceAddr {
                ip,
                broadcast,
                loopback,
            });
        }

        libc::freeifaddrs(ifaddrs);
    }

    Ok(result)
}

// The broadcast address lives in a union slot whose name differs per
// platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn broadcast_sockaddr(ifa: &libc::ifaddrs) -> *mut libc::sockaddr {
    ifa.ifa_ifu
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn broadcast_sockaddr(ifa: &libc::ifaddrs) -> *mut libc::sockaddr {
    ifa.ifa_dstaddr
}

fn sockaddr_ipv4(addr: *mut libc::sockaddr) -> Option<Ipv4Addr> {
    if addr.is_null() {
        return None;
    }
    unsafe {
        if (*addr).sa_family as i32 != libc::AF_INET {
            return None;
        }
        let sin = addr as *const libc::sockaddr_in;
        Some(Ipv4Addr::from(u32::from_be((*sin).sin_addr.s_addr)))
    }
}
