//! Polling schedule
//!
//! Each account is refreshed every [`UPDATE_INTERVAL_MINUTES`] minutes,
//! aligned to wall-clock minutes and offset by the minute and second the
//! account was set up at, so accounts spread their load on the portal.
//! Accounts set up within the same second share a schedule.

use chrono::{DateTime, Duration, Timelike, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::UPDATE_INTERVAL_MINUTES;

/// Wall-clock source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fires at every `hh:mm:ss` (UTC) with `mm % interval == offset_minute`
/// and `ss == second`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSchedule {
    offset_minute: u32,
    second: u32,
    interval_minutes: u32,
}

impl UpdateSchedule {
    pub fn from_setup_time(now: DateTime<Utc>) -> Self {
        Self {
            offset_minute: now.minute() % UPDATE_INTERVAL_MINUTES,
            second: now.second(),
            interval_minutes: UPDATE_INTERVAL_MINUTES,
        }
    }

    pub fn offset_minute(&self) -> u32 {
        self.offset_minute
    }

    pub fn second(&self) -> u32 {
        self.second
    }

    /// Minutes of the hour the schedule fires in
    pub fn minutes(&self) -> impl Iterator<Item = u32> {
        (self.offset_minute..60).step_by(self.interval_minutes as usize)
    }

    pub fn matches(&self, time: DateTime<Utc>) -> bool {
        time.minute() % self.interval_minutes == self.offset_minute && time.second() == self.second
    }

    /// First firing instant in a later second than `now`
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next_second = now - Duration::nanoseconds(i64::from(now.nanosecond()))
            + Duration::seconds(1);
        let into_hour = i64::from(next_second.minute() * 60 + next_second.second());
        let hour_start = next_second - Duration::seconds(into_hour);

        let minutes: Vec<u32> = self.minutes().collect();
        let minutes = &minutes;
        let second = self.second;
        (0..2)
            .flat_map(move |hour| {
                minutes.iter().map(move |minute| {
                    hour_start
                        + Duration::hours(hour)
                        + Duration::minutes(i64::from(*minute))
                        + Duration::seconds(i64::from(second))
                })
            })
            .find(|candidate| *candidate >= next_second)
            .unwrap_or(hour_start + Duration::hours(2))
    }
}

/// Recurring task that calls `tick` at every instant of a schedule
///
/// Dropping the timer cancels it.
pub struct UpdateTimer {
    schedule: UpdateSchedule,
    handle: JoinHandle<()>,
}

impl UpdateTimer {
    pub fn start<F, Fut>(schedule: UpdateSchedule, clock: Arc<dyn Clock>, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                let now = clock.now();
                let next = schedule.next_fire_after(now);
                let wait = (next - now).to_std().unwrap_or_default();
                trace!(%next, ?wait, "Waiting for next scheduled update");
                tokio::time::sleep(wait).await;
                tick().await;
            }
        });

        Self { schedule, handle }
    }

    pub fn schedule(&self) -> UpdateSchedule {
        self.schedule
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_offset_from_setup_time() {
        let schedule = UpdateSchedule::from_setup_time(at(10, 13, 42));
        assert_eq!(schedule.offset_minute(), 3);
        assert_eq!(schedule.second(), 42);
        assert_eq!(
            schedule.minutes().collect::<Vec<_>>(),
            [3, 8, 13, 18, 23, 28, 33, 38, 43, 48, 53, 58]
        );
    }

    #[test]
    fn test_matches() {
        let schedule = UpdateSchedule::from_setup_time(at(10, 13, 42));
        assert!(schedule.matches(at(11, 3, 42)));
        assert!(schedule.matches(at(11, 58, 42)));
        assert!(!schedule.matches(at(11, 4, 42)));
        assert!(!schedule.matches(at(11, 3, 41)));
    }

    #[test]
    fn test_same_second_same_schedule() {
        let first = UpdateSchedule::from_setup_time(at(10, 13, 42));
        let second = UpdateSchedule::from_setup_time(at(10, 13, 42) + Duration::milliseconds(400));
        assert_eq!(first, second);

        let five_later = UpdateSchedule::from_setup_time(at(10, 18, 42));
        assert_eq!(first, five_later);

        let next_minute = UpdateSchedule::from_setup_time(at(10, 14, 42));
        assert_ne!(first, next_minute);
    }

    #[test]
    fn test_next_fire() {
        let schedule = UpdateSchedule::from_setup_time(at(10, 13, 42));

        // Setup instant itself is not a firing
        assert_eq!(schedule.next_fire_after(at(10, 13, 42)), at(10, 18, 42));
        assert_eq!(
            schedule.next_fire_after(at(10, 13, 42) + Duration::milliseconds(10)),
            at(10, 18, 42)
        );
        assert_eq!(schedule.next_fire_after(at(10, 13, 41)), at(10, 13, 42));
        assert_eq!(schedule.next_fire_after(at(10, 58, 43)), at(11, 3, 42));
        assert_eq!(schedule.next_fire_after(at(23, 59, 59)), at(0, 3, 42) + Duration::days(1));
    }

    #[test]
    fn test_every_firing_matches() {
        let schedule = UpdateSchedule::from_setup_time(at(7, 2, 5));
        let mut now = at(7, 2, 5);
        for _ in 0..30 {
            let next = schedule.next_fire_after(now);
            assert!(schedule.matches(next));
            assert_eq!(next - now, Duration::minutes(5));
            now = next;
        }
    }

    /// Wall clock that follows tokio's (paused) clock
    struct TokioClock {
        start: DateTime<Utc>,
        origin: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| Duration::zero());
            self.start + elapsed
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_on_schedule_until_cancelled() {
        let start = at(10, 13, 42);
        let clock = Arc::new(TokioClock {
            start,
            origin: tokio::time::Instant::now(),
        });
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        let timer = UpdateTimer::start(UpdateSchedule::from_setup_time(start), clock, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(std::time::Duration::from_secs(4 * 60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(std::time::Duration::from_secs(2 * 60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(std::time::Duration::from_secs(10 * 60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        timer.cancel();
        tokio::time::sleep(std::time::Duration::from_secs(30 * 60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(timer.is_finished());
    }
}
