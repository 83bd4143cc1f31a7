use std::{thread, time::Duration};

use anyhow::{Context, anyhow};
use crossbeam::channel::{Receiver, bounded};
use netchange::{
    error::MonitorError,
    iface::{ChangeSignal, Monitor, NetlinkSource, SessionStats},
    runtime::{Runtime, telemetry},
};
use tokio::{
    signal::{
        self,
        unix::{SignalKind, signal as unix_signal},
    },
    sync::oneshot,
    task, time,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Runtime { conf, .. } = Runtime::new()?;
    telemetry::init_tracing(conf.log_level);

    info!(
        event.name = "system.starting",
        config_path = ?conf.config_path,
        interest_mask = conf.interest_mask,
        shutdown_timeout = %humantime::format_duration(conf.shutdown_timeout),
        "starting network-change monitor"
    );

    let (signal_tx, signal_rx) = bounded::<ChangeSignal>(0);
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let (done_tx, mut done_rx) = oneshot::channel::<Result<SessionStats, MonitorError>>();

    let reconciler = thread::Builder::new()
        .name("netchange-reconciler".to_string())
        .spawn(move || reconcile(signal_rx))
        .context("failed to spawn reconciler thread")?;

    let interest_mask = conf.interest_mask;
    thread::Builder::new()
        .name("netchange-monitor".to_string())
        .spawn(move || {
            let result =
                Monitor::new(NetlinkSource::new(), signal_tx, interest_mask).run(&shutdown_rx);
            let _ = done_tx.send(result);
        })
        .context("failed to spawn monitor thread")?;

    let mut sigterm = unix_signal(SignalKind::terminate())?;

    tokio::select! {
        result = &mut done_rx => {
            let result = result.map_err(|_| anyhow!("monitor thread exited without a result"))?;
            join_reconciler(reconciler).await;
            return result.map(|_| ()).context("network-change monitor failed");
        }
        _ = signal::ctrl_c() => {
            info!(event.name = "system.shutdown_requested", signal = "SIGINT", "received interrupt, shutting down");
        }
        _ = sigterm.recv() => {
            info!(event.name = "system.shutdown_requested", signal = "SIGTERM", "received terminate, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
    let stats = await_monitor(done_rx, conf.shutdown_timeout).await?;
    join_reconciler(reconciler).await;

    info!(
        event.name = "system.stopped",
        events_received = stats.events_received,
        signals_emitted = stats.signals_emitted,
        "network-change monitor stopped"
    );
    Ok(())
}

/// Wait up to `timeout` for the monitor thread to report back.
async fn await_monitor(
    done_rx: oneshot::Receiver<Result<SessionStats, MonitorError>>,
    timeout: Duration,
) -> anyhow::Result<SessionStats> {
    match time::timeout(timeout, done_rx).await {
        Ok(Ok(Ok(stats))) => Ok(stats),
        Ok(Ok(Err(e))) => Err(anyhow::Error::new(e).context("network-change monitor failed")),
        Ok(Err(_)) => Err(anyhow!("monitor thread exited without a result")),
        Err(_) => {
            error!(
                event.name = "system.shutdown_timeout",
                timeout = %humantime::format_duration(timeout),
                "monitor did not stop in time"
            );
            Err(anyhow!(
                "monitor did not stop within {}",
                humantime::format_duration(timeout)
            ))
        }
    }
}

/// Stand-in for a real reconcile loop: logs every signal until the monitor
/// drops its sender.
fn reconcile(signals: Receiver<ChangeSignal>) {
    let mut reconciliations = 0u64;
    for _signal in signals.iter() {
        reconciliations += 1;
        info!(
            event.name = "reconciler.signal_received",
            reconciliations = reconciliations,
            "network state changed, reconciling"
        );
    }
    info!(
        event.name = "reconciler.stopped",
        reconciliations = reconciliations,
        "reconciler stopped"
    );
}

/// Join the reconciler thread off the async workers. It returns once the
/// monitor has dropped the signal sender.
async fn join_reconciler(reconciler: thread::JoinHandle<()>) {
    match task::spawn_blocking(move || reconciler.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => warn!(
            event.name = "reconciler.panicked",
            "reconciler thread panicked"
        ),
        Err(e) => warn!(
            event.name = "reconciler.join_failed",
            error = %e,
            "failed to join reconciler thread"
        ),
    }
}
