//! Controllable wall clocks

use cdrive_connected_drive::Clock;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, RwLock};

/// Clock that only moves when told to
#[derive(Clone)]
pub struct MockClock {
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl MockClock {
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(RwLock::new(time)),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.current.write().unwrap() = time;
    }

    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap();
        *current += duration;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().unwrap()
    }
}

/// A fixed UTC instant on a fixed day
pub fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}
