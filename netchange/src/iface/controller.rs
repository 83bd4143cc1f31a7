//! Monitoring session: subscribes to link, address and route notifications
//! and turns every relevant one into a [`ChangeSignal`].
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────────┐  ┌────────────────┐  ┌────────────────┐
//!   │ address thread │  │  link thread   │  │  route thread  │
//!   │ netlink socket │  │ netlink socket │  │ netlink socket │
//!   └───────┬────────┘  └───────┬────────┘  └───────┬────────┘
//!           │ bounded(0)        │ bounded(0)        │ bounded(0)
//!           └───────────────────┼───────────────────┘
//!                               ▼
//!              ┌─────────────────────────────────┐
//!              │ Session (dispatcher thread)     │◀── shutdown
//!              │  select! over the three streams │
//!              │  InterestMask gate              │
//!              │  InterfaceTracker (link policy) │
//!              └────────────────┬────────────────┘
//!                               │ SignalSink::send (blocking)
//!                               ▼
//!                        external reconciler
//! ```
//!
//! ## Lifecycle
//!
//! 1. Validate the interest mask. An invalid mask returns before anything
//!    is subscribed.
//! 2. Subscribe to address, link and route events, in that order. Every
//!    class is subscribed even if the mask disables it.
//! 3. Seed the tracker with the interfaces that exist right now.
//! 4. Dispatch until shutdown, a closed stream or a closed sink.
//!
//! Whatever the exit path, dropping the session drops the stream receivers
//! first and then the [`Subscription`] guards, which cancel their workers.

use crossbeam::{
    channel::{Receiver, bounded},
    select,
};
use tracing::{debug, error, info};

use crate::{
    error::MonitorError,
    iface::{
        mask::InterestMask,
        sink::SignalSink,
        source::{NotificationSource, Subscription},
        tracker::InterfaceTracker,
        types::{
            AddrUpdate, ChangeSignal, EventClass, LinkChange, LinkEventKind, LinkUpdate,
            NetlinkUpdate, RouteEventKind, RouteUpdate,
        },
    },
};

/// Network-change monitor.
///
/// `raw_mask` is validated when [`Monitor::run`] starts, not here, so that a
/// bad configuration value surfaces as a session error.
#[derive(Debug)]
pub struct Monitor<N, S> {
    source: N,
    sink: S,
    raw_mask: u8,
}

impl<N, S> Monitor<N, S>
where
    N: NotificationSource,
    S: SignalSink,
{
    pub fn new(source: N, sink: S, raw_mask: u8) -> Self {
        Self {
            source,
            sink,
            raw_mask,
        }
    }

    /// Run one monitoring session on the calling thread.
    ///
    /// Returns the session's counters once `shutdown` receives a message or
    /// is disconnected, or the fatal error that ended the session.
    pub fn run(&self, shutdown: &Receiver<()>) -> Result<SessionStats, MonitorError> {
        let mask = InterestMask::try_from(self.raw_mask).inspect_err(|e| {
            error!(
                event.name = "monitor.config.invalid_mask",
                interest_mask = self.raw_mask,
                error = %e,
                "invalid interest mask, monitor not started"
            );
        })?;

        let mut session = Session::open(&self.source, &self.sink, mask).inspect_err(|e| {
            error!(
                event.name = "monitor.session.setup_failed",
                error = %e,
                "failed to start monitoring session"
            );
        })?;

        let result = session.dispatch_until(shutdown);
        let stats = session.finish();

        if let Err(e) = &result {
            error!(
                event.name = "monitor.session.failed",
                error = %e,
                "monitoring session ended with an error"
            );
        }
        result.map(|()| stats)
    }
}

/// Per-session counters, logged when the session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub events_received: u64,
    pub signals_emitted: u64,
    pub masked_drops: u64,
    pub unresolved_addresses: u64,
    pub links_added: u64,
    pub links_removed: u64,
    pub links_up: u64,
    pub links_down: u64,
    pub downs_suppressed: u64,
    /// Size of the existence set when the session ended.
    pub known_interfaces: usize,
    /// Interfaces still waiting to be seen up when the session ended.
    pub newly_created: usize,
}

impl SessionStats {
    fn record_link(&mut self, change: LinkChange) {
        let counter = match change {
            LinkChange::Added => &mut self.links_added,
            LinkChange::Removed => &mut self.links_removed,
            LinkChange::Up => &mut self.links_up,
            LinkChange::Down => &mut self.links_down,
            LinkChange::SuppressedDown => &mut self.downs_suppressed,
        };
        *counter += 1;
    }
}

struct Streams {
    link: Receiver<NetlinkUpdate>,
    address: Receiver<NetlinkUpdate>,
    route: Receiver<NetlinkUpdate>,
}

struct Session<'m, N: ?Sized, S: ?Sized> {
    source: &'m N,
    sink: &'m S,
    mask: InterestMask,
    tracker: InterfaceTracker,
    stats: SessionStats,
    // Field order matters: receivers must drop before the guards.
    streams: Streams,
    subscriptions: Vec<Subscription>,
}

impl<'m, N, S> Session<'m, N, S>
where
    N: NotificationSource + ?Sized,
    S: SignalSink + ?Sized,
{
    fn open(source: &'m N, sink: &'m S, mask: InterestMask) -> Result<Self, MonitorError> {
        let (address_tx, address) = bounded(0);
        let (link_tx, link) = bounded(0);
        let (route_tx, route) = bounded(0);

        let mut subscriptions = Vec::with_capacity(EventClass::ALL.len());
        for (class, tx) in [
            (EventClass::Address, address_tx),
            (EventClass::Link, link_tx),
            (EventClass::Route, route_tx),
        ] {
            subscriptions.push(Subscription::establish(source, class, tx)?);
        }

        let mut tracker = InterfaceTracker::new();
        tracker.seed(source.list_interfaces()?);

        info!(
            event.name = "monitor.session.started",
            interest_mask = %mask,
            subscriptions = subscriptions.len(),
            iface_count = tracker.len(),
            "monitoring session started"
        );

        Ok(Self {
            source,
            sink,
            mask,
            tracker,
            stats: SessionStats::default(),
            streams: Streams {
                link,
                address,
                route,
            },
            subscriptions,
        })
    }

    fn dispatch_until(&mut self, shutdown: &Receiver<()>) -> Result<(), MonitorError> {
        loop {
            let update = select! {
                recv(self.streams.address) -> msg => {
                    msg.map_err(|_| MonitorError::StreamClosed(EventClass::Address))?
                }
                recv(self.streams.link) -> msg => {
                    msg.map_err(|_| MonitorError::StreamClosed(EventClass::Link))?
                }
                recv(self.streams.route) -> msg => {
                    msg.map_err(|_| MonitorError::StreamClosed(EventClass::Route))?
                }
                recv(shutdown) -> _ => {
                    info!(
                        event.name = "monitor.session.shutdown",
                        "shutdown requested, ending monitoring session"
                    );
                    return Ok(());
                }
            };

            self.dispatch(update)?;
        }
    }

    fn dispatch(&mut self, update: NetlinkUpdate) -> Result<(), MonitorError> {
        self.stats.events_received += 1;

        let class = update.class();
        if !self.mask.is_enabled(class) {
            self.stats.masked_drops += 1;
            debug!(
                event.name = "monitor.event.masked",
                event.class = %class,
                update = %update,
                "event class disabled by interest mask, dropping"
            );
            return Ok(());
        }

        match update {
            NetlinkUpdate::Link(link) => self.handle_link(link),
            NetlinkUpdate::Address(addr) => self.handle_address(addr),
            NetlinkUpdate::Route(route) => self.handle_route(route),
        }
    }

    fn handle_link(&mut self, link: LinkUpdate) -> Result<(), MonitorError> {
        let change = match link.kind {
            LinkEventKind::Removed => self.tracker.on_link_deleted(&link.name),
            LinkEventKind::Added | LinkEventKind::Modified => {
                let is_new = !self.tracker.contains(&link.name);
                self.tracker
                    .on_link_observed(&link.name, is_new, link.is_up())
            }
        };

        self.stats.record_link(change);
        match change {
            LinkChange::SuppressedDown => debug!(
                event.name = "monitor.link.down_suppressed",
                network.interface.name = %link.name,
                network.interface.index = link.index,
                "interface not up yet after creation, not reporting down"
            ),
            _ => info!(
                event.name = "monitor.link.changed",
                network.interface.name = %link.name,
                network.interface.index = link.index,
                change = %change,
                "interface changed"
            ),
        }

        self.emit()
    }

    fn handle_address(&mut self, addr: AddrUpdate) -> Result<(), MonitorError> {
        let name = match self.source.interface_name(addr.index) {
            Ok(name) => name,
            Err(e) => {
                self.stats.unresolved_addresses += 1;
                info!(
                    event.name = "monitor.address.unresolved",
                    network.interface.index = addr.index,
                    network.address = %addr.display_address(),
                    error = %e,
                    "could not resolve interface for address event, dropping"
                );
                return Ok(());
            }
        };

        info!(
            event.name = if addr.is_new {
                "monitor.address.added"
            } else {
                "monitor.address.removed"
            },
            network.interface.name = %name,
            network.interface.index = addr.index,
            network.address = %addr.display_address(),
            "interface address changed"
        );

        self.emit()
    }

    fn handle_route(&mut self, route: RouteUpdate) -> Result<(), MonitorError> {
        info!(
            event.name = match route.kind {
                RouteEventKind::Added => "monitor.route.added",
                RouteEventKind::Removed => "monitor.route.removed",
            },
            network.route.destination = %route.display_destination(),
            "route changed"
        );

        self.emit()
    }

    fn emit(&mut self) -> Result<(), MonitorError> {
        self.sink.send(ChangeSignal)?;
        self.stats.signals_emitted += 1;
        Ok(())
    }

    fn finish(&mut self) -> SessionStats {
        self.stats.known_interfaces = self.tracker.len();
        self.stats.newly_created = self.tracker.newly_created_len();

        info!(
            event.name = "monitor.session.stats",
            subscriptions = self.subscriptions.len(),
            events_received = self.stats.events_received,
            signals_emitted = self.stats.signals_emitted,
            masked_drops = self.stats.masked_drops,
            unresolved_addresses = self.stats.unresolved_addresses,
            links_added = self.stats.links_added,
            links_removed = self.stats.links_removed,
            links_up = self.stats.links_up,
            links_down = self.stats.links_down,
            downs_suppressed = self.stats.downs_suppressed,
            known_interfaces = self.stats.known_interfaces,
            newly_created = self.stats.newly_created,
            "monitoring session ended"
        );
        self.stats
    }
}
