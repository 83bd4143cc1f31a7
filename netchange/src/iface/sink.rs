//! Output side of the monitor: where change signals go.

use crossbeam::channel::Sender;

use crate::{error::MonitorError, iface::types::ChangeSignal};

/// Receiver of change signals. `send` blocks until the consumer has taken
/// the signal; the dispatcher does nothing else while it waits.
pub trait SignalSink {
    fn send(&self, signal: ChangeSignal) -> Result<(), MonitorError>;
}

/// Blocking handoff over a crossbeam channel. Create the channel with
/// `crossbeam::channel::bounded(0)` for an unbuffered rendezvous.
impl SignalSink for Sender<ChangeSignal> {
    fn send(&self, signal: ChangeSignal) -> Result<(), MonitorError> {
        Sender::send(self, signal).map_err(|_| MonitorError::SinkClosed)
    }
}

impl<S> SignalSink for &S
where
    S: SignalSink + ?Sized,
{
    fn send(&self, signal: ChangeSignal) -> Result<(), MonitorError> {
        SignalSink::send(&**self, signal)
    }
}
