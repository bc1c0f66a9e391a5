//! Job scheduler with fixed-interval and wall-clock triggers.
//!
//! Each job runs on its own task and awaits its body before computing the
//! next fire time, so a job never overlaps itself: fire times that pass while
//! it is still running are skipped. Shutdown is signalled through a
//! `watch` channel; a running body is allowed to finish, nothing new starts.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First run one full period after start.
    Every(Duration),
    Daily(NaiveTime),
    Weekly(Weekday, NaiveTime),
}

impl Trigger {
    /// Next fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
        match *self {
            Trigger::Every(period) => {
                now + chrono::Duration::from_std(period).unwrap_or(chrono::Duration::minutes(15))
            }
            Trigger::Daily(at) => next_local(now, tz, at, None),
            Trigger::Weekly(day, at) => next_local(now, tz, at, Some(day)),
        }
    }
}

/// Earliest instant after `now` whose local time in `tz` is `at` (on `day`
/// when given). Local times skipped by a DST jump move to the next day.
fn next_local(now: DateTime<Utc>, tz: Tz, at: NaiveTime, day: Option<Weekday>) -> DateTime<Utc> {
    let mut date = now.with_timezone(&tz).date_naive();
    for _ in 0..15 {
        let wanted_day = day.map_or(true, |d| date.weekday() == d);
        if wanted_day {
            if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
                let candidate = candidate.with_timezone(&Utc);
                if candidate > now {
                    return candidate;
                }
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now + chrono::Duration::days(1)
}

struct Job {
    name: String,
    trigger: Trigger,
    run: JobFn,
}

pub struct Scheduler {
    tz: Tz,
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new(tz: Tz) -> Self {
        Self { tz, jobs: Vec::new() }
    }

    pub fn add<F, Fut>(&mut self, name: impl Into<String>, trigger: Trigger, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run: JobFn = Arc::new(move || Box::pin(f()) as JobFuture);
        self.jobs.push(Job {
            name: name.into(),
            trigger,
            run,
        });
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut set = JoinSet::new();
        for job in self.jobs {
            let rx = shutdown.clone();
            let tz = self.tz;
            info!(job = %job.name, trigger = ?job.trigger, "scheduled job");
            set.spawn(run_job(job, tz, rx));
        }
        while set.join_next().await.is_some() {}
        info!("scheduler stopped");
    }
}

async fn run_job(job: Job, tz: Tz, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let now = Utc::now();
        let next = job.trigger.next_after(now, tz);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(job = %job.name, next = %next, "waiting for next run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        debug!(job = %job.name, "running job");
        (job.run)().await;
    }
    debug!(job = %job.name, "job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn daily_fires_later_today_or_tomorrow() {
        let tz = chrono_tz::Europe::Moscow;
        // 05:00 UTC = 08:00 MSK, so 09:00 MSK is one hour away.
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 5, 0, 0).unwrap();
        assert_eq!(
            Trigger::Daily(hm(9, 0)).next_after(now, tz),
            Utc.with_ymd_and_hms(2024, 5, 6, 6, 0, 0).unwrap()
        );
        // Exactly at fire time: next one is tomorrow.
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 6, 0, 0).unwrap();
        assert_eq!(
            Trigger::Daily(hm(9, 0)).next_after(at, tz),
            Utc.with_ymd_and_hms(2024, 5, 7, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn weekly_finds_next_matching_weekday() {
        let tz = chrono_tz::UTC;
        // 2024-05-07 is a Tuesday.
        let now = Utc.with_ymd_and_hms(2024, 5, 7, 12, 0, 0).unwrap();
        assert_eq!(
            Trigger::Weekly(Weekday::Mon, hm(10, 0)).next_after(now, tz),
            Utc.with_ymd_and_hms(2024, 5, 13, 10, 0, 0).unwrap()
        );
        let monday_early = Utc.with_ymd_and_hms(2024, 5, 13, 9, 0, 0).unwrap();
        assert_eq!(
            Trigger::Weekly(Weekday::Mon, hm(10, 0)).next_after(monday_early, tz),
            Utc.with_ymd_and_hms(2024, 5, 13, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn dst_gap_moves_to_next_day() {
        let tz = chrono_tz::Europe::Berlin;
        // 02:30 does not exist in Berlin on 2024-03-31.
        let now = Utc.with_ymd_and_hms(2024, 3, 30, 23, 0, 0).unwrap();
        let next = Trigger::Daily(hm(2, 30)).next_after(now, tz);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 1, 0, 30, 0).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_job_runs_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(chrono_tz::UTC);
        let c = count.clone();
        scheduler.add("tick", Trigger::Every(Duration::from_secs(60)), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(scheduler.job_names(), vec!["tick"]);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_job_does_not_overlap_itself() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(chrono_tz::UTC);
        let (r, m) = (running.clone(), max_seen.clone());
        scheduler.add("slow", Trigger::Every(Duration::from_secs(10)), move || {
            let (r, m) = (r.clone(), m.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(35)).await;
                r.fetch_sub(1, Ordering::SeqCst);
            }
        });

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_secs(200)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
