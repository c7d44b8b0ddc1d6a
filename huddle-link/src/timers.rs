//! Watchdog, keepalive and reconnect timers.
//!
//! Timers never touch connection state. Each one posts a message, stamped
//! with the generation it was armed under, back to the manager's command
//! channel; the manager drops messages from older generations. Aborting
//! the task on cancel is only an optimisation on top of that check.
//!
//! - Watchdog (14s): pings the transport, recovers ghost connections.
//! - Keepalive (20s): pings through the normal send path.
//! - Reconnect (one-shot, backoff delay): reopens after a close.

use std::time::Duration;

use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// What a watchdog tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Transport looks dead without having reported a close: reopen now.
    Reconnect,
    /// Transport looks alive: send a ping to prove it.
    Ping,
    /// Nothing to watch.
    Idle,
}

/// Decide a watchdog tick from the transport's own view and the caller's intent.
pub fn watchdog_action(transport_open: bool, reconnect_desired: bool) -> WatchdogAction {
    match (transport_open, reconnect_desired) {
        (true, _) => WatchdogAction::Ping,
        (false, true) => WatchdogAction::Reconnect,
        (false, false) => WatchdogAction::Idle,
    }
}

/// Post `make()` every `period`, first after one full period.
///
/// Stops when the receiving side is gone.
pub fn spawn_periodic<T, F>(period: Duration, tx: WeakUnboundedSender<T>, make: F) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn() -> T + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(tx) = tx.upgrade() else { break };
            if tx.send(make()).is_err() {
                break;
            }
        }
    })
}

/// Post `message` once after `delay`.
pub fn spawn_once<T>(delay: Duration, tx: WeakUnboundedSender<T>, message: T) -> JoinHandle<()>
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        time::sleep(delay).await;
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(message);
        }
    })
}

/// The manager's armed timers.
#[derive(Debug, Default)]
pub struct TimerSet {
    watchdog: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm_watchdog(&mut self, handle: JoinHandle<()>) {
        replace(&mut self.watchdog, handle);
    }

    pub fn arm_keepalive(&mut self, handle: JoinHandle<()>) {
        replace(&mut self.keepalive, handle);
    }

    pub fn arm_reconnect(&mut self, handle: JoinHandle<()>) {
        replace(&mut self.reconnect, handle);
    }

    pub fn cancel_all(&mut self) {
        cancel(&mut self.watchdog);
        cancel(&mut self.keepalive);
        cancel(&mut self.reconnect);
    }

    #[cfg(test)]
    fn reconnect_pending(&self) -> bool {
        self.reconnect.as_ref().is_some_and(|h| !h.is_finished())
    }

    #[cfg(test)]
    fn periodic_running(&self) -> bool {
        self.watchdog.is_some() || self.keepalive.is_some()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn replace(slot: &mut Option<JoinHandle<()>>, handle: JoinHandle<()>) {
    if let Some(old) = slot.replace(handle) {
        old.abort();
    }
}

fn cancel(slot: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_watchdog_decisions() {
        assert_eq!(watchdog_action(true, true), WatchdogAction::Ping);
        assert_eq!(watchdog_action(true, false), WatchdogAction::Ping);
        assert_eq!(watchdog_action(false, true), WatchdogAction::Reconnect);
        assert_eq!(watchdog_action(false, false), WatchdogAction::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_after_full_period() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let _handle = spawn_periodic(Duration::from_secs(14), tx.downgrade(), || 7);

        time::sleep(Duration::from_secs(13)).await;
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv(), Ok(7));

        time::sleep(Duration::from_secs(14)).await;
        assert_eq!(rx.try_recv(), Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
        let _handle = spawn_once(Duration::from_millis(350), tx.downgrade(), "reopen");

        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rx.try_recv(), Ok("reopen"));

        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let mut timers = TimerSet::new();
        timers.arm_watchdog(spawn_periodic(Duration::from_secs(1), tx.downgrade(), || 1));
        timers.arm_reconnect(spawn_once(Duration::from_secs(1), tx.downgrade(), 2));
        assert!(timers.periodic_running());
        assert!(timers.reconnect_pending());

        timers.cancel_all();
        assert!(!timers.periodic_running());

        time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel::<u8>();
        let handle = spawn_periodic(Duration::from_secs(1), tx.downgrade(), || 1);
        drop(tx);
        drop(rx);

        time::sleep(Duration::from_secs(3)).await;
        assert!(handle.is_finished());
    }
}
