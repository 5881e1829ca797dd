//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tracing::debug;

use crate::capabilities;
use crate::error::IoError;
use crate::packet::{RouterAdvertisement, RouterSolicitation};

// All-nodes and all-routers link-local multicast groups (RFC 4861).
pub const ALL_NODES: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x1);
pub const ALL_ROUTERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x2);

// NDP messages are sent and accepted with the maximum hop limit only
// (RFC 4861, Section 6.1).
const NDP_HOP_LIMIT: c_int = 255;

// FFI definitions for the ICMPV6_FILTER socket option, which libc does
// not expose. A set bit blocks the corresponding ICMPv6 type.
#[allow(non_camel_case_types)]
#[repr(C)]
struct icmp6_filter {
    icmp6_filt: [u32; 8],
}

const ICMP6_FILTER: c_int = 1;

/// One raw ICMPv6 socket bound to a single interface.
///
/// Implementations must be safe to share between the worker's transmit and
/// receive paths; `close` is idempotent and fails any pending or
/// subsequent operation with [`IoError::SocketClosed`].
#[async_trait]
pub trait RaSocket: Send + Sync {
    /// Sends a Router Advertisement to the all-nodes multicast group.
    async fn send_multicast(
        &self,
        msg: &RouterAdvertisement,
    ) -> Result<(), IoError>;

    /// Sends a Router Advertisement to a link-local unicast address on
    /// this interface.
    async fn send_unicast(
        &self,
        msg: &RouterAdvertisement,
        dst: Ipv6Addr,
    ) -> Result<(), IoError>;

    /// Waits for the next Router Solicitation and returns it together
    /// with its source address.
    async fn recv_rs(&self) -> Result<(RouterSolicitation, Ipv6Addr), IoError>;

    /// Releases the kernel resources. Idempotent.
    fn close(&self);
}

/// Factory for per-interface sockets.
///
/// The daemon accepts an alternative implementation so tests can observe
/// the traffic through in-memory sockets.
#[async_trait]
pub trait SocketProvider: Send + Sync {
    async fn open(&self, ifname: &str) -> Result<Arc<dyn RaSocket>, IoError>;
}

/// The production socket provider, backed by raw ICMPv6 sockets.
#[derive(Debug, Default)]
pub struct SystemSocketProvider();

// Raw ICMPv6 socket joined to the all-routers group on one interface,
// filtered down to Router Solicitations.
pub struct Icmpv6Socket {
    ifindex: u32,
    fd: Mutex<Option<Arc<AsyncFd<Socket>>>>,
    closed: watch::Sender<bool>,
}

// ===== impl SystemSocketProvider =====

#[async_trait]
impl SocketProvider for SystemSocketProvider {
    async fn open(&self, ifname: &str) -> Result<Arc<dyn RaSocket>, IoError> {
        let socket = Icmpv6Socket::open(ifname)?;
        Ok(Arc::new(socket))
    }
}

// ===== impl Icmpv6Socket =====

impl Icmpv6Socket {
    fn open(ifname: &str) -> Result<Icmpv6Socket, IoError> {
        let ifindex = nix::net::if_::if_nametoindex(ifname)
            .map_err(|errno| {
                IoError::SocketError(std::io::Error::from_raw_os_error(
                    errno as i32,
                ))
            })?;

        let socket = capabilities::raise(|| {
            Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
        })
        .map_err(IoError::SocketError)?;
        socket.set_nonblocking(true).map_err(IoError::SocketError)?;
        socket
            .bind_device(Some(ifname.as_bytes()))
            .map_err(IoError::SocketError)?;
        socket
            .set_multicast_loop_v6(false)
            .map_err(IoError::SocketError)?;

        // NDP requires hop limit 255 in both directions.
        setsockopt_int(
            &socket,
            libc::IPPROTO_IPV6,
            libc::IPV6_MULTICAST_HOPS,
            NDP_HOP_LIMIT,
        )
        .map_err(IoError::SocketError)?;
        setsockopt_int(
            &socket,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            NDP_HOP_LIMIT,
        )
        .map_err(IoError::SocketError)?;
        setsockopt_int(
            &socket,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVHOPLIMIT,
            1,
        )
        .map_err(IoError::SocketError)?;

        // Accept Router Solicitations only.
        let mut filter = icmp6_filter {
            icmp6_filt: [!0u32; 8],
        };
        let rs = crate::packet::MSG_TYPE_ROUTER_SOLICIT as u32;
        filter.icmp6_filt[(rs >> 5) as usize] &= !(1u32 << (rs & 31));
        setsockopt_raw(
            &socket,
            libc::IPPROTO_ICMPV6,
            ICMP6_FILTER,
            &filter as *const _ as *const c_void,
            std::mem::size_of::<icmp6_filter>() as libc::socklen_t,
        )
        .map_err(IoError::SocketError)?;

        socket
            .join_multicast_v6(&ALL_ROUTERS, ifindex)
            .map_err(IoError::MulticastJoinError)?;

        let fd = AsyncFd::new(socket).map_err(IoError::SocketError)?;
        let (closed, _) = watch::channel(false);
        Ok(Icmpv6Socket {
            ifindex,
            fd: Mutex::new(Some(Arc::new(fd))),
            closed,
        })
    }

    fn fd(&self) -> Result<Arc<AsyncFd<Socket>>, IoError> {
        self.fd
            .lock()
            .unwrap()
            .as_ref()
            .cloned()
            .ok_or(IoError::SocketClosed)
    }

    async fn send_to(
        &self,
        msg: &RouterAdvertisement,
        dst: Ipv6Addr,
    ) -> Result<(), IoError> {
        let fd = self.fd()?;
        let buf = msg.encode();
        let dst = SocketAddrV6::new(dst, 0, 0, self.ifindex);
        let dst = socket2::SockAddr::from(dst);
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow() {
                return Err(IoError::SocketClosed);
            }
            tokio::select! {
                _ = closed.changed() => (),
                guard = fd.writable() => {
                    let mut guard = guard.map_err(IoError::SendError)?;
                    match guard
                        .try_io(|fd| fd.get_ref().send_to(&buf, &dst))
                    {
                        Ok(Ok(_)) => return Ok(()),
                        Ok(Err(error)) => {
                            return Err(IoError::SendError(error));
                        }
                        Err(_would_block) => continue,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl RaSocket for Icmpv6Socket {
    async fn send_multicast(
        &self,
        msg: &RouterAdvertisement,
    ) -> Result<(), IoError> {
        self.send_to(msg, ALL_NODES).await
    }

    async fn send_unicast(
        &self,
        msg: &RouterAdvertisement,
        dst: Ipv6Addr,
    ) -> Result<(), IoError> {
        self.send_to(msg, dst).await
    }

    async fn recv_rs(&self) -> Result<(RouterSolicitation, Ipv6Addr), IoError> {
        let fd = self.fd()?;
        let mut closed = self.closed.subscribe();
        let mut buf = [0u8; 1280];
        loop {
            if *closed.borrow() {
                return Err(IoError::SocketClosed);
            }
            let recv = tokio::select! {
                _ = closed.changed() => continue,
                guard = fd.readable() => {
                    let mut guard = guard.map_err(IoError::RecvError)?;
                    match guard.try_io(|fd| {
                        recv_with_hoplimit(fd.get_ref().as_raw_fd(), &mut buf)
                    }) {
                        Ok(Ok(recv)) => recv,
                        Ok(Err(error)) => {
                            return Err(IoError::RecvError(error));
                        }
                        Err(_would_block) => continue,
                    }
                }
            };

            let (len, src, hop_limit) = recv;
            let Some(src) = src else {
                IoError::RecvMissingSourceAddr.log();
                continue;
            };
            if hop_limit != Some(255) {
                debug!(%src, ?hop_limit, "discarding solicitation without maximum hop limit");
                continue;
            }
            // RFC 4861, Section 6.1.1: the source must be link-local or
            // unspecified.
            if !src.is_unspecified() && !is_link_local(&src) {
                debug!(%src, "discarding solicitation from invalid source");
                continue;
            }
            match RouterSolicitation::decode(&buf[..len]) {
                Ok(rs) => return Ok((rs, src)),
                Err(error) => {
                    debug!(%src, %error, "discarding malformed solicitation");
                    continue;
                }
            }
        }
    }

    fn close(&self) {
        self.fd.lock().unwrap().take();
        self.closed.send_replace(true);
    }
}

// ===== helper functions =====

fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

// Receives one packet along with its source address and the IPV6_HOPLIMIT
// ancillary data.
fn recv_with_hoplimit(
    fd: std::os::unix::io::RawFd,
    buf: &mut [u8],
) -> std::io::Result<(usize, Option<Ipv6Addr>, Option<u8>)> {
    let mut src: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut c_void,
        iov_len: buf.len(),
    };
    // Aligned control-message buffer.
    let mut cmsg_buf = [0u64; 16];

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = &mut src as *mut _ as *mut c_void;
    msg.msg_namelen = std::mem::size_of::<libc::sockaddr_in6>()
        as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
    msg.msg_controllen = std::mem::size_of_val(&cmsg_buf);

    let len = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if len < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut hop_limit = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IPV6
                && (*cmsg).cmsg_type == libc::IPV6_HOPLIMIT
            {
                let data = libc::CMSG_DATA(cmsg) as *const c_int;
                hop_limit = Some(*data as u8);
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    let src_addr = (src.sin6_family == libc::AF_INET6 as libc::sa_family_t)
        .then(|| Ipv6Addr::from(src.sin6_addr.s6_addr));

    Ok((len as usize, src_addr, hop_limit))
}

fn setsockopt_int<F: AsRawFd>(
    sock: &F,
    level: c_int,
    name: c_int,
    value: c_int,
) -> std::io::Result<()> {
    setsockopt_raw(
        sock,
        level,
        name,
        &value as *const _ as *const c_void,
        std::mem::size_of::<c_int>() as libc::socklen_t,
    )
}

fn setsockopt_raw<F: AsRawFd>(
    sock: &F,
    level: c_int,
    name: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> std::io::Result<()> {
    let ret;

    unsafe {
        ret = libc::setsockopt(sock.as_raw_fd(), level, name, optval, optlen);
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}
