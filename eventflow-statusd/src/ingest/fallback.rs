use std::future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};

/// Snapshot polling used while the push channel is down.
///
/// Holds at most one interval, so the poll can never run concurrently with
/// itself. `start`/`stop` are idempotent and report whether they changed
/// anything.
pub struct PollFallback {
    period: Duration,
    interval: Option<Interval>,
}

impl PollFallback {
    pub fn new(period: Duration) -> Self {
        Self { period, interval: None }
    }

    pub fn start(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }
        // first cycle one period from now, like a plain repeating timer
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        true
    }

    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves on the next poll cycle; never resolves while stopped
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending().await,
        }
    }
}

/// Single pending reconnect attempt after a fixed delay.
pub struct ReconnectTimer {
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, sleep: None }
    }

    /// Arm the timer unless an attempt is already pending
    pub fn schedule(&mut self) -> bool {
        if self.sleep.is_some() {
            return false;
        }
        self.sleep = Some(Box::pin(time::sleep(self.delay)));
        true
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolves once when the armed delay elapses, disarming the timer
    pub async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => future::pending().await,
        }
    }
}
