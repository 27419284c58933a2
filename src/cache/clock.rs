use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;

/// Fuente de tiempo para las entradas del caché.
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Reloj manual para pruebas: sólo avanza cuando se le pide.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at the Unix epoch, handy for `t = 0, 1, 2...` scenarios.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn advance(&self, by: std::time::Duration) {
        let delta = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::MAX);
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn set_secs(&self, secs: i64) {
        *self.now.lock() = DateTime::<Utc>::UNIX_EPOCH + ChronoDuration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);

        clock.set_secs(5);
        assert_eq!(clock.now().timestamp(), 5);
    }
}
