/// Countdown in whole seconds. Driven externally by one tick per wall-clock
/// second; pausing stops the decrement entirely so paused time never counts
/// against the candidate.
#[derive(Debug)]
pub struct AttemptTimer {
    remaining: u32,
    paused: bool,
    fired_ten_minute: bool,
    fired_one_minute: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWarning {
    TenMinutes,
    OneMinute,
}

/// Outcome of a single tick. `expired` is reported exactly once, on the tick
/// that reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerTick {
    pub warning: Option<TimeWarning>,
    pub expired: bool,
}

const TEN_MINUTES: u32 = 600;
const ONE_MINUTE: u32 = 60;

impl AttemptTimer {
    pub fn new(initial_seconds: u32) -> Self {
        Self {
            remaining: initial_seconds,
            paused: false,
            fired_ten_minute: false,
            fired_one_minute: false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn tick(&mut self) -> TimerTick {
        if self.paused || self.remaining == 0 {
            return TimerTick::default();
        }

        self.remaining -= 1;

        let warning = if self.remaining <= ONE_MINUTE && !self.fired_one_minute {
            self.fired_one_minute = true;
            // Skip straight past the ten-minute signal on short papers.
            self.fired_ten_minute = true;
            Some(TimeWarning::OneMinute)
        } else if self.remaining <= TEN_MINUTES && !self.fired_ten_minute {
            self.fired_ten_minute = true;
            Some(TimeWarning::TenMinutes)
        } else {
            None
        };

        TimerTick { warning, expired: self.remaining == 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_one_second_per_tick() {
        let mut timer = AttemptTimer::new(3);
        assert!(!timer.tick().expired);
        assert!(!timer.tick().expired);
        let last = timer.tick();
        assert!(last.expired);
        assert_eq!(timer.remaining(), 0);
        // Once expired, further ticks are inert.
        assert!(!timer.tick().expired);
    }

    #[test]
    fn paused_time_is_not_counted() {
        let mut timer = AttemptTimer::new(100);
        timer.tick();
        assert_eq!(timer.remaining(), 99);

        timer.pause();
        for _ in 0..30 {
            timer.tick();
        }
        assert_eq!(timer.remaining(), 99);

        timer.resume();
        timer.tick();
        assert_eq!(timer.remaining(), 98);
    }

    #[test]
    fn threshold_warnings_fire_once() {
        let mut timer = AttemptTimer::new(602);
        assert_eq!(timer.tick().warning, None);
        assert_eq!(timer.tick().warning, Some(TimeWarning::TenMinutes));
        assert_eq!(timer.tick().warning, None);

        let mut warnings = Vec::new();
        while timer.remaining() > 0 {
            if let Some(warning) = timer.tick().warning {
                warnings.push(warning);
            }
        }
        assert_eq!(warnings, vec![TimeWarning::OneMinute]);
    }

    #[test]
    fn short_paper_skips_the_ten_minute_signal() {
        let mut timer = AttemptTimer::new(60);
        assert_eq!(timer.tick().warning, Some(TimeWarning::OneMinute));
        let mut rest = Vec::new();
        while timer.remaining() > 0 {
            if let Some(warning) = timer.tick().warning {
                rest.push(warning);
            }
        }
        assert!(rest.is_empty());
    }
}
