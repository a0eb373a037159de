// Clock and per-turn countdowns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Source of wall-clock timestamps for commits.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Sent by a countdown to its draft actor. Each signal names the turn
/// generation it was armed for so the actor can discard stale ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    Tick {
        generation: u64,
        seconds_remaining: u32,
    },
    Expired {
        generation: u64,
    },
}

impl TimerSignal {
    pub fn generation(&self) -> u64 {
        match self {
            TimerSignal::Tick { generation, .. } | TimerSignal::Expired { generation } => *generation,
        }
    }
}

/// Starts countdowns that tick at a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct TimerService {
    tick: Duration,
}

impl TimerService {
    pub fn new(tick: Duration) -> Self {
        TimerService {
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    /// Arm a countdown of `duration` for the given turn generation.
    ///
    /// The countdown emits a `Tick` every interval while time remains and a
    /// single `Expired` at the deadline. Dropping or cancelling the returned
    /// handle stops it; nothing is sent afterwards.
    pub fn start(
        &self,
        generation: u64,
        duration: Duration,
        tx: mpsc::UnboundedSender<TimerSignal>,
    ) -> Countdown {
        let deadline = Instant::now() + duration;
        let handle = tokio::spawn(run_countdown(generation, deadline, self.tick, tx));
        Countdown {
            generation,
            deadline,
            handle,
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        TimerService::new(Duration::from_secs(1))
    }
}

/// A running countdown for one turn.
#[derive(Debug)]
pub struct Countdown {
    generation: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl Countdown {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whole seconds left, rounded up.
    pub fn seconds_remaining(&self) -> u32 {
        ceil_secs(self.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn ceil_secs(d: Duration) -> u32 {
    d.as_millis().div_ceil(1000) as u32
}

async fn run_countdown(
    generation: u64,
    deadline: Instant,
    tick: Duration,
    tx: mpsc::UnboundedSender<TimerSignal>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            biased;
            _ = &mut expiry => {
                let _ = tx.send(TimerSignal::Expired { generation });
                return;
            }
            _ = ticker.tick() => {
                let seconds_remaining = ceil_secs(deadline.saturating_duration_since(Instant::now()));
                if seconds_remaining == 0 {
                    continue;
                }
                if tx
                    .send(TimerSignal::Tick {
                        generation,
                        seconds_remaining,
                    })
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_then_expires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TimerService::new(Duration::from_secs(1));
        let countdown = timers.start(4, Duration::from_secs(3), tx);
        assert_eq!(countdown.seconds_remaining(), 3);

        assert_eq!(
            rx.recv().await.unwrap(),
            TimerSignal::Tick {
                generation: 4,
                seconds_remaining: 2
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            TimerSignal::Tick {
                generation: 4,
                seconds_remaining: 1
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            TimerSignal::Expired { generation: 4 }
        );
        // The task ended and dropped its sender.
        assert!(rx.recv().await.is_none());
        drop(countdown);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_countdown_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TimerService::new(Duration::from_secs(1));
        let countdown = timers.start(1, Duration::from_secs(2), tx);
        countdown.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        // Aborting drops the task's sender, closing the channel empty.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn seconds_remaining_rounds_up() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let timers = TimerService::new(Duration::from_secs(1));
        let countdown = timers.start(1, Duration::from_secs(30), tx);
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(countdown.seconds_remaining(), 25);
    }

    #[test]
    fn system_clock_is_utc_now() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
