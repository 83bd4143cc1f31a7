// Netlink-backed notification source
//
// Each subscription owns one netlink-sys socket bound to the multicast groups of
// its event class and one worker thread. The worker polls the socket together with
// the subscription's cancel eventfd, decodes every message in a datagram with
// netlink-packet-route and forwards the ones belonging to its class.

use std::{
    io::{self, ErrorKind},
    net::IpAddr,
    os::fd::AsRawFd,
    sync::Arc,
    thread,
};

use crossbeam::channel::Sender;
use ipnetwork::IpNetwork;
use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, poll, pollfd};
use netlink_packet_core::{
    NLM_F_DUMP, NLM_F_REQUEST, NetlinkBuffer, NetlinkHeader, NetlinkMessage, NetlinkPayload,
};
use netlink_packet_route::{
    RouteNetlinkMessage,
    address::{AddressAttribute, AddressMessage},
    link::{LinkAttribute, LinkMessage},
    route::{RouteAddress, RouteAttribute, RouteMessage},
};
use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::MonitorError,
    iface::{
        source::{CancelSignal, NotificationSource},
        types::{
            AddrUpdate, EventClass, LinkEventKind, LinkUpdate, NetlinkUpdate, RouteEventKind,
            RouteUpdate,
        },
    },
};

/// Multicast group bitmasks. netlink-sys expects a BITMASK in
/// `SocketAddr::groups`, not a group id.
const RTMGRP_LINK: u32 = 0x0000_0001;
const RTMGRP_IPV4_IFADDR: u32 = 0x0000_0010;
const RTMGRP_IPV4_ROUTE: u32 = 0x0000_0040;
const RTMGRP_IPV6_IFADDR: u32 = 0x0000_0100;
const RTMGRP_IPV6_ROUTE: u32 = 0x0000_0400;

/// Netlink messages are padded to 4 bytes.
const NLMSG_ALIGNTO: usize = 4;

/// Multicast groups carrying the notifications of `class`.
pub fn multicast_groups(class: EventClass) -> u32 {
    match class {
        EventClass::Link => RTMGRP_LINK,
        EventClass::Address => RTMGRP_IPV4_IFADDR | RTMGRP_IPV6_IFADDR,
        EventClass::Route => RTMGRP_IPV4_ROUTE | RTMGRP_IPV6_ROUTE,
    }
}

/// [`NotificationSource`] backed by rtnetlink multicast subscriptions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetlinkSource;

impl NetlinkSource {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSource for NetlinkSource {
    fn subscribe(
        &self,
        class: EventClass,
        tx: Sender<NetlinkUpdate>,
        cancel: Arc<CancelSignal>,
    ) -> Result<(), MonitorError> {
        let groups = multicast_groups(class);

        let mut socket =
            Socket::new(NETLINK_ROUTE).map_err(|e| MonitorError::subscribe(class, e))?;
        socket
            .bind(&SocketAddr::new(0, groups))
            .map_err(|e| MonitorError::subscribe(class, e))?;

        thread::Builder::new()
            .name(format!("netchange-{class}"))
            .spawn(move || run_subscription(class, socket, tx, cancel))
            .map_err(|e| MonitorError::subscribe(class, e))?;

        info!(
            event.name = "netlink.subscribed",
            event.class = %class,
            rtmgrp_bitmask = format!("0x{groups:08x}"),
            "subscribed to netlink multicast groups"
        );

        Ok(())
    }

    fn list_interfaces(&self) -> Result<Vec<String>, MonitorError> {
        let links = dump_links().map_err(MonitorError::Enumerate)?;

        debug!(
            event.name = "netlink.interfaces_discovered",
            iface_count = links.len(),
            "enumerated existing interfaces"
        );

        Ok(links.into_iter().map(|(_, name)| name).collect())
    }

    fn interface_name(&self, index: u32) -> Result<String, MonitorError> {
        let links = dump_links().map_err(|e| {
            warn!(
                event.name = "netlink.link_dump_failed",
                network.interface.index = index,
                error = %e,
                "failed to dump links while resolving interface index"
            );
            MonitorError::UnknownInterface(index)
        })?;

        links
            .into_iter()
            .find_map(|(idx, name)| (idx == index).then_some(name))
            .ok_or(MonitorError::UnknownInterface(index))
    }
}

/// Worker loop of one subscription. Returns when canceled, when the
/// dispatcher drops its receiver, or on a socket error.
fn run_subscription(
    class: EventClass,
    socket: Socket,
    tx: Sender<NetlinkUpdate>,
    cancel: Arc<CancelSignal>,
) {
    let mut fds = [
        pollfd {
            fd: socket.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        },
        pollfd {
            fd: cancel.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        },
    ];
    let mut total_forwarded = 0u64;

    loop {
        // SAFETY: fds is a valid, initialized array; -1 waits indefinitely.
        let poll_ret = unsafe { poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if poll_ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            error!(
                event.name = "netlink.poll_error",
                event.class = %class,
                error = %err,
                "poll() failed, closing subscription"
            );
            break;
        }

        if (fds[1].revents & POLLIN) != 0 {
            debug!(
                event.name = "netlink.subscription_canceled",
                event.class = %class,
                total_forwarded = total_forwarded,
                "cancel signal received, closing subscription"
            );
            break;
        }

        match socket_readiness(fds[0].revents) {
            SocketReadiness::Idle => continue,
            SocketReadiness::Readable => {}
            SocketReadiness::Closed => {
                error!(
                    event.name = "netlink.socket_error",
                    event.class = %class,
                    revents = fds[0].revents,
                    "netlink socket hung up or invalid, closing subscription"
                );
                break;
            }
        }

        let data = match socket.recv_from_full() {
            Ok((data, _)) => data,
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                warn!(
                    event.name = "netlink.notifications_lost",
                    event.class = %class,
                    "kernel dropped notifications, receive buffer overrun"
                );
                continue;
            }
            Err(e) => {
                error!(
                    event.name = "netlink.socket_recv_error",
                    event.class = %class,
                    error = %e,
                    "error receiving from netlink socket, closing subscription"
                );
                break;
            }
        };

        trace!(
            event.name = "netlink.data_received",
            event.class = %class,
            bytes = data.len(),
            "received netlink data"
        );

        for message in parse_datagram(&data) {
            let NetlinkPayload::InnerMessage(rtnl_msg) = message.payload else {
                continue;
            };
            let Some(update) = to_update(class, rtnl_msg) else {
                continue;
            };

            if tx.send(update).is_err() {
                debug!(
                    event.name = "netlink.receiver_dropped",
                    event.class = %class,
                    "dispatcher stopped receiving, closing subscription"
                );
                return;
            }
            total_forwarded += 1;
        }
    }

    info!(
        event.name = "netlink.subscription_stopped",
        event.class = %class,
        total_forwarded = total_forwarded,
        "netlink subscription stopped"
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketReadiness {
    Idle,
    Readable,
    Closed,
}

/// Classify the socket's `revents`. A pending socket error (POLLERR, set by
/// the kernel on a receive buffer overrun) is read like data: `recv` returns
/// it once and clears it.
fn socket_readiness(revents: libc::c_short) -> SocketReadiness {
    if (revents & (POLLHUP | POLLNVAL)) != 0 {
        SocketReadiness::Closed
    } else if (revents & (POLLIN | POLLERR)) != 0 {
        SocketReadiness::Readable
    } else {
        SocketReadiness::Idle
    }
}

/// Split a datagram into its netlink messages, stepping by NLMSG_ALIGN.
/// Parsing stops at the first truncated or undecodable message.
pub fn parse_datagram(bytes: &[u8]) -> Vec<NetlinkMessage<RouteNetlinkMessage>> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        let msg_len = match NetlinkBuffer::new_checked(remaining) {
            Ok(nl_buf) => nl_buf.length() as usize,
            Err(e) => {
                trace!(
                    event.name = "netlink.buffer_check_failed",
                    error = ?e,
                    offset = offset,
                    remaining = remaining.len(),
                    "not enough bytes for complete message, ending parse loop"
                );
                break;
            }
        };

        match NetlinkMessage::<RouteNetlinkMessage>::deserialize(&remaining[..msg_len]) {
            Ok(message) => messages.push(message),
            Err(e) => {
                warn!(
                    event.name = "netlink.message_parse_error",
                    error = %e,
                    "failed to parse netlink message, skipping remaining messages in datagram"
                );
                break;
            }
        }

        let aligned = (msg_len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1);
        match offset.checked_add(aligned) {
            Some(next) if aligned > 0 => offset = next,
            _ => {
                warn!(
                    event.name = "netlink.invalid_message_length",
                    msg_len = msg_len,
                    offset = offset,
                    buffer_size = bytes.len(),
                    "invalid message length detected, stopping parse"
                );
                break;
            }
        }
    }

    messages
}

/// Convert a decoded message into an update if it belongs to `class`.
pub fn to_update(class: EventClass, message: RouteNetlinkMessage) -> Option<NetlinkUpdate> {
    match (class, message) {
        (EventClass::Link, RouteNetlinkMessage::NewLink(link)) => {
            link_update(LinkEventKind::Added, link).map(NetlinkUpdate::Link)
        }
        (EventClass::Link, RouteNetlinkMessage::SetLink(link)) => {
            link_update(LinkEventKind::Modified, link).map(NetlinkUpdate::Link)
        }
        (EventClass::Link, RouteNetlinkMessage::DelLink(link)) => {
            link_update(LinkEventKind::Removed, link).map(NetlinkUpdate::Link)
        }
        (EventClass::Address, RouteNetlinkMessage::NewAddress(addr)) => {
            Some(NetlinkUpdate::Address(addr_update(addr, true)))
        }
        (EventClass::Address, RouteNetlinkMessage::DelAddress(addr)) => {
            Some(NetlinkUpdate::Address(addr_update(addr, false)))
        }
        (EventClass::Route, RouteNetlinkMessage::NewRoute(route)) => {
            Some(NetlinkUpdate::Route(route_update(RouteEventKind::Added, route)))
        }
        (EventClass::Route, RouteNetlinkMessage::DelRoute(route)) => {
            Some(NetlinkUpdate::Route(route_update(RouteEventKind::Removed, route)))
        }
        _ => None,
    }
}

fn link_name(link: &LinkMessage) -> Option<String> {
    link.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })
}

fn link_update(kind: LinkEventKind, link: LinkMessage) -> Option<LinkUpdate> {
    let Some(name) = link_name(&link) else {
        trace!(
            event.name = "netlink.link_without_name",
            network.interface.index = link.header.index,
            "link message carries no interface name, skipping"
        );
        return None;
    };

    Some(LinkUpdate {
        kind,
        index: link.header.index,
        name,
        flags: link.header.flags,
    })
}

fn addr_update(addr: AddressMessage, is_new: bool) -> AddrUpdate {
    // IFA_LOCAL is the interface's own address on point-to-point links;
    // IFA_ADDRESS is the peer there and identical to IFA_LOCAL otherwise.
    let local = addr.attributes.iter().find_map(|attr| match attr {
        AddressAttribute::Local(ip) => Some(*ip),
        _ => None,
    });
    let address = local.or_else(|| {
        addr.attributes.iter().find_map(|attr| match attr {
            AddressAttribute::Address(ip) => Some(*ip),
            _ => None,
        })
    });

    AddrUpdate {
        index: addr.header.index,
        address,
        prefix_len: addr.header.prefix_len,
        is_new,
    }
}

fn route_update(kind: RouteEventKind, route: RouteMessage) -> RouteUpdate {
    let prefix_len = route.header.destination_prefix_length;
    let destination = route.attributes.iter().find_map(|attr| match attr {
        RouteAttribute::Destination(RouteAddress::Inet(ip)) => Some(IpAddr::V4(*ip)),
        RouteAttribute::Destination(RouteAddress::Inet6(ip)) => Some(IpAddr::V6(*ip)),
        _ => None,
    });

    RouteUpdate {
        kind,
        destination: destination.and_then(|ip| IpNetwork::new(ip, prefix_len).ok()),
    }
}

/// Dump every link through an RTM_GETLINK request, returning `(index, name)`.
fn dump_links() -> io::Result<Vec<(u32, String)>> {
    let mut socket = Socket::new(NETLINK_ROUTE)?;
    socket.bind_auto()?;

    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST | NLM_F_DUMP;
    header.sequence_number = 1;

    let mut request = NetlinkMessage::new(
        header,
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::GetLink(LinkMessage::default())),
    );
    request.finalize();

    let mut buf = vec![0u8; request.header.length as usize];
    request.serialize(&mut buf);
    socket.send_to(&buf, &SocketAddr::new(0, 0), 0)?;

    let mut links = Vec::new();
    loop {
        let (data, _) = socket.recv_from_full()?;
        let messages = parse_datagram(&data);
        if messages.is_empty() {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "undecodable link dump response",
            ));
        }

        for message in messages {
            match message.payload {
                NetlinkPayload::Done(_) => return Ok(links),
                NetlinkPayload::Error(err) => return Err(err.to_io()),
                NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)) => {
                    if let Some(name) = link_name(&link) {
                        links.push((link.header.index, name));
                    }
                }
                _ => {}
            }
        }
    }
}
