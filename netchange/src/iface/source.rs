//! Notification source boundary.
//!
//! A [`NotificationSource`] delivers link, address and route notifications on
//! one stream per class. Each subscription is torn down through a
//! [`CancelSignal`] owned by the caller; [`Subscription`] fires it on drop so
//! every exit path of a session releases exactly the subscriptions it holds.

use std::{
    io, mem,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    sync::Arc,
};

use crossbeam::channel::Sender;
use libc::{EFD_CLOEXEC, EFD_NONBLOCK, POLLIN, c_void, eventfd, poll, pollfd};
use tracing::{trace, warn};

use crate::{
    error::MonitorError,
    iface::types::{EventClass, NetlinkUpdate},
};

/// OS facility the monitor subscribes to.
pub trait NotificationSource {
    /// Start delivering `class` notifications on `tx` until `cancel` fires.
    ///
    /// Must only return once the underlying kernel subscription is live, or
    /// with an error if it could not be established.
    fn subscribe(
        &self,
        class: EventClass,
        tx: Sender<NetlinkUpdate>,
        cancel: Arc<CancelSignal>,
    ) -> Result<(), MonitorError>;

    /// Names of the interfaces currently present on the host.
    fn list_interfaces(&self) -> Result<Vec<String>, MonitorError>;

    /// Resolve an interface index to its name.
    fn interface_name(&self, index: u32) -> Result<String, MonitorError>;
}

impl<N> NotificationSource for &N
where
    N: NotificationSource + ?Sized,
{
    fn subscribe(
        &self,
        class: EventClass,
        tx: Sender<NetlinkUpdate>,
        cancel: Arc<CancelSignal>,
    ) -> Result<(), MonitorError> {
        (**self).subscribe(class, tx, cancel)
    }

    fn list_interfaces(&self) -> Result<Vec<String>, MonitorError> {
        (**self).list_interfaces()
    }

    fn interface_name(&self, index: u32) -> Result<String, MonitorError> {
        (**self).interface_name(index)
    }
}

/// One-shot cancellation signal backed by an eventfd so that a thread blocked
/// in `poll()` on a netlink socket can wait on it too.
#[derive(Debug)]
pub struct CancelSignal(OwnedFd);

impl CancelSignal {
    pub fn new() -> Result<Self, MonitorError> {
        // SAFETY: eventfd() has no memory-safety preconditions; the result is checked.
        let fd = unsafe { eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if fd < 0 {
            return Err(MonitorError::Cancel(io::Error::last_os_error()));
        }
        // SAFETY: fd is a freshly created descriptor that nothing else owns.
        Ok(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Fire the signal. Firing more than once is harmless.
    pub fn signal(&self) -> Result<(), MonitorError> {
        let val: u64 = 1;
        // SAFETY: the fd is owned by self and val outlives the call.
        let ret = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                &val as *const u64 as *const c_void,
                mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            return Err(MonitorError::Cancel(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Whether the signal has fired. Does not consume it.
    pub fn is_signaled(&self) -> bool {
        let mut fds = [pollfd {
            fd: self.0.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        }];
        // SAFETY: fds is a valid, initialized array; a zero timeout never blocks.
        let ret = unsafe { poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 0) };
        ret > 0 && (fds[0].revents & POLLIN) != 0
    }
}

impl AsRawFd for CancelSignal {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// An established subscription. Dropping it cancels the subscription.
#[derive(Debug)]
pub struct Subscription {
    class: EventClass,
    cancel: Arc<CancelSignal>,
}

impl Subscription {
    /// Create the cancel signal for `class` and subscribe through `source`.
    /// On error nothing is left running.
    pub fn establish<N>(
        source: &N,
        class: EventClass,
        tx: Sender<NetlinkUpdate>,
    ) -> Result<Self, MonitorError>
    where
        N: NotificationSource + ?Sized,
    {
        let cancel = Arc::new(CancelSignal::new()?);
        source.subscribe(class, tx, Arc::clone(&cancel))?;
        Ok(Self { class, cancel })
    }

    pub fn class(&self) -> EventClass {
        self.class
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match self.cancel.signal() {
            Ok(()) => trace!(
                event.name = "monitor.subscription.canceled",
                event.class = %self.class,
                "subscription canceled"
            ),
            Err(e) => warn!(
                event.name = "monitor.subscription.cancel_failed",
                event.class = %self.class,
                error = %e,
                "failed to cancel subscription"
            ),
        }
    }
}
