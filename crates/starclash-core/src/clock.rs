use serde::{Deserialize, Serialize};

/// One discrete step of the shared simulation clock.
pub type Tick = u32;

/// Default simulation rate in Hz.
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Monotonic tick counter shared in meaning by every participant.
///
/// Participants may disagree on wall time, but never on "tick N has occurred".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimClock {
    tick: Tick,
    tick_rate_hz: u32,
}

impl SimClock {
    pub fn new(tick_rate_hz: u32) -> Self {
        Self {
            tick: 0,
            tick_rate_hz: tick_rate_hz.max(1),
        }
    }

    /// Clock that starts at `tick`, used when a participant joins mid-match.
    pub fn starting_at(tick: Tick, tick_rate_hz: u32) -> Self {
        Self {
            tick,
            tick_rate_hz: tick_rate_hz.max(1),
        }
    }

    pub fn now(&self) -> Tick {
        self.tick
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    pub fn advance(&mut self) -> Tick {
        self.tick = self.tick.saturating_add(1);
        self.tick
    }

    /// Number of whole ticks needed to cover `secs`, rounded up.
    pub fn ticks_for_secs(&self, secs: f32) -> Tick {
        if !secs.is_finite() || secs <= 0.0 {
            return 0;
        }
        (secs * self.tick_rate_hz as f32).ceil() as Tick
    }

    /// The tick that is `secs` seconds from now.
    pub fn secs_from_now(&self, secs: f32) -> Tick {
        self.tick.saturating_add(self.ticks_for_secs(secs))
    }

    /// Fixed step duration in seconds.
    pub fn delta_secs(&self) -> f32 {
        1.0 / self.tick_rate_hz as f32
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE_HZ)
    }
}

/// A timer stored as an absolute expiry tick.
///
/// Cancelling a timer is just overwriting it with [`TickTimer::NONE`]; there is
/// no background task to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickTimer {
    expires_at: Option<Tick>,
}

impl TickTimer {
    pub const NONE: TickTimer = TickTimer { expires_at: None };

    pub fn from_secs(clock: &SimClock, secs: f32) -> Self {
        Self {
            expires_at: Some(clock.secs_from_now(secs)),
        }
    }

    pub fn at(tick: Tick) -> Self {
        Self {
            expires_at: Some(tick),
        }
    }

    pub fn expires_at(&self) -> Option<Tick> {
        self.expires_at
    }

    /// True once the expiry tick has been reached, or if the timer was never set.
    pub fn expired_or_not_running(&self, clock: &SimClock) -> bool {
        self.expires_at.is_none_or(|at| clock.now() >= at)
    }

    pub fn is_running(&self, clock: &SimClock) -> bool {
        !self.expired_or_not_running(clock)
    }

    /// Set and already reached.
    pub fn has_expired(&self, clock: &SimClock) -> bool {
        self.expires_at.is_some_and(|at| clock.now() >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_up_to_whole_ticks() {
        let clock = SimClock::new(60);
        assert_eq!(clock.ticks_for_secs(0.2), 12);
        assert_eq!(clock.ticks_for_secs(0.21), 13);
        assert_eq!(clock.ticks_for_secs(0.0), 0);
        assert_eq!(clock.ticks_for_secs(-1.0), 0);
        assert_eq!(clock.ticks_for_secs(f32::NAN), 0);
    }

    #[test]
    fn timer_expires_at_exact_tick() {
        let mut clock = SimClock::new(10);
        let timer = TickTimer::from_secs(&clock, 0.2);
        assert_eq!(timer.expires_at(), Some(2));
        assert!(timer.is_running(&clock));
        clock.advance();
        assert!(timer.is_running(&clock));
        clock.advance();
        assert!(timer.expired_or_not_running(&clock));
        assert!(timer.has_expired(&clock));
    }

    #[test]
    fn unset_timer_is_not_running() {
        let clock = SimClock::default();
        assert!(TickTimer::NONE.expired_or_not_running(&clock));
        assert!(!TickTimer::NONE.has_expired(&clock));
    }

    #[test]
    fn zero_rate_is_clamped() {
        let clock = SimClock::new(0);
        assert_eq!(clock.tick_rate_hz(), 1);
        assert!(clock.delta_secs().is_finite());
    }
}
