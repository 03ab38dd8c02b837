use std::future::pending;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTick {
    HandshakeRetry,
    Heartbeat,
}

async fn tick_or_pending(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

/// Every timer a tracking client owns. Dropping the set (or calling `clear`)
/// cancels all of them; nothing is left scheduled on the runtime.
#[derive(Debug, Default)]
pub struct TimerSet {
    connect_timeout: Option<Pin<Box<Sleep>>>,
    reconnect: Option<Pin<Box<Sleep>>>,
    handshake_retry: Option<Interval>,
    heartbeat: Option<Interval>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm_connect_timeout(&mut self, after: Duration) {
        self.connect_timeout = Some(Box::pin(time::sleep(after)));
    }

    pub fn disarm_connect_timeout(&mut self) {
        self.connect_timeout = None;
    }

    /// Resolves once when the armed connect timeout fires; pends forever when disarmed.
    pub async fn connect_timed_out(&mut self) {
        match self.connect_timeout.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.connect_timeout = None;
            }
            None => pending::<()>().await,
        }
    }

    pub fn schedule_reconnect(&mut self, after: Duration) {
        self.reconnect = Some(Box::pin(time::sleep(after)));
    }

    pub async fn reconnect_due(&mut self) {
        match self.reconnect.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.reconnect = None;
            }
            None => pending::<()>().await,
        }
    }

    /// First tick fires immediately, then every `period`.
    pub fn start_handshake_retry(&mut self, period: Duration) {
        let mut interval = time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.handshake_retry = Some(interval);
    }

    pub fn stop_handshake_retry(&mut self) {
        self.handshake_retry = None;
    }

    pub fn handshake_retry_active(&self) -> bool {
        self.handshake_retry.is_some()
    }

    /// First tick fires one `period` from now.
    pub fn start_heartbeat(&mut self, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.is_some()
    }

    /// Next tick of whichever session timer fires first.
    pub async fn next_session_tick(&mut self) -> SessionTick {
        tokio::select! {
            _ = tick_or_pending(&mut self.handshake_retry) => SessionTick::HandshakeRetry,
            _ = tick_or_pending(&mut self.heartbeat) => SessionTick::Heartbeat,
        }
    }

    /// Stop the timers that only make sense while a socket is open.
    pub fn stop_session_timers(&mut self) {
        self.handshake_retry = None;
        self.heartbeat = None;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_idle(&self) -> bool {
        self.connect_timeout.is_none()
            && self.reconnect.is_none()
            && self.handshake_retry.is_none()
            && self.heartbeat.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fires_once() {
        let mut timers = TimerSet::new();
        timers.arm_connect_timeout(Duration::from_secs(5));

        let started = Instant::now();
        timers.connect_timed_out().await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(timers.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_ticks_immediately_then_periodically() {
        let mut timers = TimerSet::new();
        timers.start_handshake_retry(Duration::from_secs(1));

        let started = Instant::now();
        assert_eq!(timers.next_session_tick().await, SessionTick::HandshakeRetry);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(timers.next_session_tick().await, SessionTick::HandshakeRetry);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_waits_one_period() {
        let mut timers = TimerSet::new();
        timers.start_heartbeat(Duration::from_secs(30));

        let started = Instant::now();
        assert_eq!(timers.next_session_tick().await, SessionTick::Heartbeat);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_timers_never_fire() {
        let mut timers = TimerSet::new();
        timers.schedule_reconnect(Duration::from_millis(10));
        timers.start_heartbeat(Duration::from_millis(10));
        timers.start_handshake_retry(Duration::from_millis(10));
        timers.clear();
        assert!(timers.is_idle());

        let fired = tokio::time::timeout(Duration::from_secs(60), async {
            timers.reconnect_due().await;
            timers.next_session_tick().await;
        })
        .await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_timers_stop_independently() {
        let mut timers = TimerSet::new();
        timers.schedule_reconnect(Duration::from_secs(2));
        timers.start_heartbeat(Duration::from_secs(30));
        timers.start_handshake_retry(Duration::from_secs(1));

        timers.stop_session_timers();
        assert!(!timers.heartbeat_active());
        assert!(!timers.handshake_retry_active());
        assert!(!timers.is_idle());

        timers.reconnect_due().await;
        assert!(timers.is_idle());
    }
}
