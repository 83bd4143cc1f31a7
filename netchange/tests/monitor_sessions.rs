use std::{
    collections::HashMap,
    io,
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded};
use ipnetwork::IpNetwork;
use netchange::{
    error::MonitorError,
    iface::{
        AddrUpdate, CancelSignal, ChangeSignal, EventClass, LinkEventKind, LinkUpdate, Monitor,
        NetlinkUpdate, NotificationSource, RouteEventKind, RouteUpdate,
    },
};
use netlink_packet_route::link::LinkFlags;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct FakeSource {
    names: HashMap<u32, String>,
    existing: Vec<String>,
    fail_subscribe: Option<EventClass>,
    fail_enumerate: bool,
    senders: Mutex<HashMap<EventClass, Sender<NetlinkUpdate>>>,
    cancels: Mutex<Vec<(EventClass, Arc<CancelSignal>)>>,
    subscribe_calls: AtomicUsize,
    enumerate_calls: AtomicUsize,
}

impl FakeSource {
    fn with_name(mut self, index: u32, name: &str) -> Self {
        self.names.insert(index, name.to_string());
        self
    }

    /// Sender of the `class` stream, once the monitor subscribed to it.
    fn stream(&self, class: EventClass) -> Sender<NetlinkUpdate> {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(tx) = self.senders.lock().unwrap().get(&class) {
                return tx.clone();
            }
            assert!(Instant::now() < deadline, "no {class} subscription");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn canceled(&self) -> Vec<EventClass> {
        self.cancels
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, cancel)| cancel.is_signaled())
            .map(|(class, _)| *class)
            .collect()
    }
}

impl NotificationSource for FakeSource {
    fn subscribe(
        &self,
        class: EventClass,
        tx: Sender<NetlinkUpdate>,
        cancel: Arc<CancelSignal>,
    ) -> Result<(), MonitorError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe == Some(class) {
            return Err(MonitorError::subscribe(
                class,
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        self.senders.lock().unwrap().insert(class, tx);
        self.cancels.lock().unwrap().push((class, cancel));
        Ok(())
    }

    fn list_interfaces(&self) -> Result<Vec<String>, MonitorError> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_enumerate {
            return Err(MonitorError::Enumerate(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            )));
        }
        Ok(self.existing.clone())
    }

    fn interface_name(&self, index: u32) -> Result<String, MonitorError> {
        self.names
            .get(&index)
            .cloned()
            .ok_or(MonitorError::UnknownInterface(index))
    }
}

fn link(kind: LinkEventKind, index: u32, name: &str, up: bool) -> NetlinkUpdate {
    NetlinkUpdate::Link(LinkUpdate {
        kind,
        index,
        name: name.to_string(),
        flags: if up { LinkFlags::Up } else { LinkFlags::empty() },
    })
}

fn address_added(index: u32) -> NetlinkUpdate {
    NetlinkUpdate::Address(AddrUpdate {
        index,
        address: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 9, 1))),
        prefix_len: 24,
        is_new: true,
    })
}

fn route_added(prefix: Ipv4Addr, len: u8) -> NetlinkUpdate {
    NetlinkUpdate::Route(RouteUpdate {
        kind: RouteEventKind::Added,
        destination: Some(IpNetwork::new(IpAddr::V4(prefix), len).unwrap()),
    })
}

#[test]
fn link_and_address_mask_ignores_routes() {
    let source = FakeSource::default().with_name(9, "eth9");
    let (signal_tx, signal_rx) = bounded::<ChangeSignal>(0);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    thread::scope(|s| {
        let source = &source;
        let session = s.spawn(move || Monitor::new(source, signal_tx, 3).run(&shutdown_rx));

        source
            .stream(EventClass::Link)
            .send(link(LinkEventKind::Added, 9, "eth9", false))
            .unwrap();
        assert_eq!(signal_rx.recv_timeout(WAIT), Ok(ChangeSignal));

        source
            .stream(EventClass::Address)
            .send(address_added(9))
            .unwrap();
        assert_eq!(signal_rx.recv_timeout(WAIT), Ok(ChangeSignal));

        // Returns once the dispatcher has taken the event.
        source
            .stream(EventClass::Route)
            .send_timeout(route_added(Ipv4Addr::new(10, 0, 0, 0), 8), WAIT)
            .unwrap();

        shutdown_tx.send(()).unwrap();
        let stats = session.join().unwrap().expect("clean shutdown");

        assert_eq!(stats.events_received, 3);
        assert_eq!(stats.signals_emitted, 2);
        assert_eq!(stats.masked_drops, 1);
        assert_eq!(stats.newly_created, 1);
    });

    assert_eq!(signal_rx.try_recv(), Err(TryRecvError::Disconnected));
    assert_eq!(source.canceled().len(), 3);
}

#[test]
fn link_only_mask_signals_every_link_event() {
    let source = FakeSource::default();
    let (signal_tx, signal_rx) = bounded::<ChangeSignal>(0);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    thread::scope(|s| {
        let source = &source;
        let session = s.spawn(move || Monitor::new(source, signal_tx, 1).run(&shutdown_rx));
        let links = source.stream(EventClass::Link);

        for (kind, up) in [
            (LinkEventKind::Added, false),
            (LinkEventKind::Modified, false),
            (LinkEventKind::Modified, true),
        ] {
            links.send(link(kind, 2, "eth0", up)).unwrap();
            assert_eq!(signal_rx.recv_timeout(WAIT), Ok(ChangeSignal));
        }

        shutdown_tx.send(()).unwrap();
        let stats = session.join().unwrap().expect("clean shutdown");

        assert_eq!(stats.signals_emitted, 3);
        assert_eq!(stats.links_added, 1);
        assert_eq!(stats.downs_suppressed, 1);
        assert_eq!(stats.links_up, 1);
        assert_eq!(stats.links_down, 0);
        assert_eq!(stats.known_interfaces, 1);
        assert_eq!(stats.newly_created, 0);
    });

    assert_eq!(signal_rx.try_recv(), Err(TryRecvError::Disconnected));
}

#[test]
fn unresolvable_address_emits_nothing() {
    let source = FakeSource::default();
    let (signal_tx, signal_rx) = bounded::<ChangeSignal>(0);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    thread::scope(|s| {
        let source = &source;
        let session = s.spawn(move || Monitor::new(source, signal_tx, 7).run(&shutdown_rx));

        source
            .stream(EventClass::Address)
            .send(address_added(77))
            .unwrap();
        assert_eq!(
            signal_rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        );

        // The session is still alive and handling events.
        source
            .stream(EventClass::Route)
            .send(route_added(Ipv4Addr::new(172, 16, 0, 0), 12))
            .unwrap();
        assert_eq!(signal_rx.recv_timeout(WAIT), Ok(ChangeSignal));

        shutdown_tx.send(()).unwrap();
        let stats = session.join().unwrap().expect("clean shutdown");
        assert_eq!(stats.unresolved_addresses, 1);
        assert_eq!(stats.signals_emitted, 1);
    });
}

#[test]
fn stalled_consumer_blocks_further_events() {
    let source = FakeSource::default();
    let (signal_tx, signal_rx) = bounded::<ChangeSignal>(0);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    thread::scope(|s| {
        let source = &source;
        let session = s.spawn(move || Monitor::new(source, signal_tx, 1).run(&shutdown_rx));
        let links = source.stream(EventClass::Link);

        links
            .send(link(LinkEventKind::Added, 3, "veth0", false))
            .unwrap();

        // Dispatcher is parked on the signal handoff, so it takes nothing else.
        let second = link(LinkEventKind::Modified, 3, "veth0", true);
        let second = match links.send_timeout(second, Duration::from_millis(100)) {
            Err(SendTimeoutError::Timeout(update)) => update,
            other => panic!("expected the dispatcher to be blocked, got {other:?}"),
        };

        assert_eq!(signal_rx.recv_timeout(WAIT), Ok(ChangeSignal));
        links.send_timeout(second, WAIT).unwrap();
        assert_eq!(signal_rx.recv_timeout(WAIT), Ok(ChangeSignal));

        shutdown_tx.send(()).unwrap();
        session.join().unwrap().expect("clean shutdown");
    });
}

#[test]
fn invalid_mask_never_subscribes() {
    let source = FakeSource::default();
    let (signal_tx, signal_rx) = bounded::<ChangeSignal>(0);
    let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);

    for mask in [0u8, 8, 255] {
        let err = Monitor::new(&source, &signal_tx, mask)
            .run(&shutdown_rx)
            .expect_err("invalid mask");
        assert!(matches!(err, MonitorError::InvalidInterestMask(m) if m == mask));
    }

    assert_eq!(source.subscribe_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.enumerate_calls.load(Ordering::SeqCst), 0);
    assert_eq!(signal_rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn failed_subscription_releases_earlier_ones() {
    let source = FakeSource {
        fail_subscribe: Some(EventClass::Route),
        ..Default::default()
    };
    let (signal_tx, _signal_rx) = bounded::<ChangeSignal>(0);
    let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);

    let err = Monitor::new(&source, &signal_tx, 7)
        .run(&shutdown_rx)
        .expect_err("route subscription fails");

    assert!(matches!(
        err,
        MonitorError::Subscribe {
            class: EventClass::Route,
            ..
        }
    ));
    assert_eq!(source.subscribe_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        source.canceled(),
        vec![EventClass::Address, EventClass::Link]
    );
    assert_eq!(source.enumerate_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_enumeration_releases_every_subscription() {
    let source = FakeSource {
        fail_enumerate: true,
        ..Default::default()
    };
    let (signal_tx, _signal_rx) = bounded::<ChangeSignal>(0);
    let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);

    let err = Monitor::new(&source, &signal_tx, 7)
        .run(&shutdown_rx)
        .expect_err("enumeration fails");

    assert!(matches!(err, MonitorError::Enumerate(_)));
    assert_eq!(source.canceled().len(), 3);
}

#[test]
fn dropped_shutdown_sender_ends_session() {
    let source = FakeSource {
        existing: vec!["lo".to_string()],
        ..Default::default()
    };
    let (signal_tx, _signal_rx) = bounded::<ChangeSignal>(0);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    thread::scope(|s| {
        let source = &source;
        let session = s.spawn(move || Monitor::new(source, signal_tx, 7).run(&shutdown_rx));
        source.stream(EventClass::Route);

        drop(shutdown_tx);
        session.join().unwrap().expect("clean shutdown");
    });

    assert_eq!(source.canceled().len(), 3);
}

#[test]
fn closed_stream_is_fatal() {
    let source = FakeSource::default();
    let (signal_tx, _signal_rx) = bounded::<ChangeSignal>(0);
    let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);

    thread::scope(|s| {
        let source = &source;
        let session = s.spawn(move || Monitor::new(source, signal_tx, 7).run(&shutdown_rx));
        source.stream(EventClass::Route);

        source.senders.lock().unwrap().remove(&EventClass::Route);

        let err = session.join().unwrap().expect_err("stream closed");
        assert!(matches!(err, MonitorError::StreamClosed(EventClass::Route)));
    });

    assert_eq!(source.canceled().len(), 3);
}

#[test]
fn closed_sink_is_fatal() {
    let source = FakeSource::default();
    let (signal_tx, signal_rx) = bounded::<ChangeSignal>(0);
    let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);
    drop(signal_rx);

    thread::scope(|s| {
        let source = &source;
        let session = s.spawn(move || Monitor::new(source, signal_tx, 4).run(&shutdown_rx));

        source
            .stream(EventClass::Route)
            .send(route_added(Ipv4Addr::new(10, 1, 0, 0), 16))
            .unwrap();

        let err = session.join().unwrap().expect_err("sink closed");
        assert!(matches!(err, MonitorError::SinkClosed));
    });
}
