//! Periodic local tick driving liveness and countdown recomputation.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::state::clock::ClockService;

/// One tick of the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tick {
    /// Ticks delivered so far; `0` before the first one.
    pub seq: u64,
    /// Server-corrected time in whole seconds.
    pub now_secs: i64,
    /// Server-corrected time in milliseconds.
    pub corrected_now_ms: i64,
}

/// Publish a [`Tick`] every `period` until cancelled.
///
/// The sender is dropped on return, so receivers see the channel close and no tick is
/// delivered after cancellation.
pub async fn run(
    clock: Arc<ClockService>,
    period: Duration,
    tx: watch::Sender<Tick>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seq = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        seq += 1;
        let corrected_now_ms = clock.corrected_now();
        tx.send_replace(Tick {
            seq,
            now_secs: corrected_now_ms.div_euclid(1_000),
            corrected_now_ms,
        });
    }

    debug!(ticks = seq, "clock ticker stopped");
}

#[cfg(test)]
mod tests {
    use crate::state::clock::ManualClock;

    use super::*;

    #[tokio::test]
    async fn ticks_carry_corrected_time() {
        let clock = Arc::new(ClockService::new(Arc::new(ManualClock::new(10_000))));
        clock.update_offset_at(12_500, 10_000);
        let (tx, mut rx) = watch::channel(Tick::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            Arc::clone(&clock),
            Duration::from_millis(10),
            tx,
            cancel.clone(),
        ));

        rx.changed().await.unwrap();
        let tick = *rx.borrow_and_update();
        assert!(tick.seq >= 1);
        assert_eq!(tick.corrected_now_ms, 12_500);
        assert_eq!(tick.now_secs, 12);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn no_ticks_after_cancel() {
        let clock = Arc::new(ClockService::system());
        let (tx, mut rx) = watch::channel(Tick::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(clock, Duration::from_millis(5), tx, cancel.clone()));

        rx.changed().await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        let last = rx.borrow_and_update().seq;
        assert!(rx.changed().await.is_err());
        assert_eq!(rx.borrow().seq, last);
    }
}
