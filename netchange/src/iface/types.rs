//! Types flowing between the netlink subscription threads, the dispatcher
//! and the change signal consumer.
//!
//! - Subscription thread (one per event class) → dispatcher: [`NetlinkUpdate`]
//! - Dispatcher → consumer: [`ChangeSignal`]
//! - Link handler → logs: [`LinkChange`]

use std::{fmt, net::IpAddr};

use ipnetwork::IpNetwork;
use netlink_packet_route::link::LinkFlags;

/// The three notification classes the monitor subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Link,
    Address,
    Route,
}

impl EventClass {
    /// All classes, in the order subscriptions are established.
    pub const ALL: [EventClass; 3] = [EventClass::Address, EventClass::Link, EventClass::Route];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Address => "address",
            Self::Route => "route",
        }
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel notification kind for a link message.
///
/// `RTM_NEWLINK` announces both new and modified links; the dispatcher
/// decides which one it is from its own existence set, so `Added` and
/// `Modified` are handled identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEventKind {
    /// RTM_NEWLINK
    Added,
    /// RTM_SETLINK
    Modified,
    /// RTM_DELLINK
    Removed,
}

/// A link (network interface) notification.
#[derive(Debug, Clone)]
pub struct LinkUpdate {
    pub kind: LinkEventKind,
    pub index: u32,
    pub name: String,
    pub flags: LinkFlags,
}

impl LinkUpdate {
    pub fn is_up(&self) -> bool {
        self.flags.contains(LinkFlags::Up)
    }
}

/// An address notification (RTM_NEWADDR / RTM_DELADDR).
#[derive(Debug, Clone)]
pub struct AddrUpdate {
    /// Kernel index of the interface owning the address.
    pub index: u32,
    pub address: Option<IpAddr>,
    pub prefix_len: u8,
    /// `true` for RTM_NEWADDR, `false` for RTM_DELADDR.
    pub is_new: bool,
}

impl AddrUpdate {
    /// Address in `ip/prefix` form for logging.
    pub fn display_address(&self) -> String {
        match self.address {
            Some(ip) => format!("{ip}/{}", self.prefix_len),
            None => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEventKind {
    /// RTM_NEWROUTE
    Added,
    /// RTM_DELROUTE
    Removed,
}

/// A route notification.
#[derive(Debug, Clone)]
pub struct RouteUpdate {
    pub kind: RouteEventKind,
    /// Destination prefix; `None` for the default route.
    pub destination: Option<IpNetwork>,
}

impl RouteUpdate {
    pub fn display_destination(&self) -> String {
        match self.destination {
            Some(net) => net.to_string(),
            None => "default".to_string(),
        }
    }
}

/// Tagged union of everything a subscription stream can deliver.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum NetlinkUpdate {
    Link(LinkUpdate),
    Address(AddrUpdate),
    Route(RouteUpdate),
}

impl NetlinkUpdate {
    pub fn class(&self) -> EventClass {
        match self {
            Self::Link(_) => EventClass::Link,
            Self::Address(_) => EventClass::Address,
            Self::Route(_) => EventClass::Route,
        }
    }
}

impl fmt::Display for NetlinkUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(link) => write!(f, "link_{:?}({})", link.kind, link.name),
            Self::Address(addr) => write!(
                f,
                "address_{}({}, index {})",
                if addr.is_new { "added" } else { "removed" },
                addr.display_address(),
                addr.index
            ),
            Self::Route(route) => {
                write!(f, "route_{:?}({})", route.kind, route.display_destination())
            }
        }
    }
}

/// Content-free token telling the consumer to re-evaluate current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSignal;

/// How the link handler classified a link notification.
///
/// Only affects what gets logged; every link notification produces a
/// signal regardless of its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Added,
    Removed,
    Up,
    Down,
    /// Not-up report for an interface that has not been seen up since it
    /// was created.
    SuppressedDown,
}

impl fmt::Display for LinkChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "interface_added"),
            Self::Removed => write!(f, "interface_removed"),
            Self::Up => write!(f, "interface_up"),
            Self::Down => write!(f, "interface_down"),
            Self::SuppressedDown => write!(f, "interface_down_suppressed"),
        }
    }
}
