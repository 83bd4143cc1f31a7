// Network-change monitoring
//
// Subscribes to rtnetlink link, address and route notifications and folds
// them into a single change signal for a reconcile loop. The netlink side is
// behind the NotificationSource trait and the output behind SignalSink so
// sessions can run against fakes.

pub mod controller;
pub mod mask;
pub mod netlink_monitor;
pub mod sink;
pub mod source;
pub mod tracker;
pub mod types;

pub use controller::{Monitor, SessionStats};
pub use mask::InterestMask;
pub use netlink_monitor::NetlinkSource;
pub use sink::SignalSink;
pub use source::{CancelSignal, NotificationSource, Subscription};
pub use tracker::InterfaceTracker;
pub use types::{
    AddrUpdate, ChangeSignal, EventClass, LinkChange, LinkEventKind, LinkUpdate, NetlinkUpdate,
    RouteEventKind, RouteUpdate,
};
