//! Operator-facing reports: scheduled digests and command replies.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::action::ActionStatus;
use crate::collab::CrmClient;
use crate::config::Thresholds;
use crate::error::Result;
use crate::store::Store;
use crate::types::{Lead, LeadFilter, Task};

const HOT_LIMIT: usize = 5;
const RISK_LIMIT: usize = 10;
const SCORE_HISTORY: usize = 5;
const THOUGHT_HISTORY: usize = 3;
const THOUGHT_PREVIEW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Morning,
    Evening,
    Weekly,
}

impl std::str::FromStr for DigestKind {
    type Err = crate::error::LeadwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "morning" => Ok(DigestKind::Morning),
            "evening" => Ok(DigestKind::Evening),
            "weekly" => Ok(DigestKind::Weekly),
            _ => Err(crate::error::LeadwatchError::InvalidConfig(format!(
                "unknown digest '{s}': must be morning, evening, or weekly"
            ))),
        }
    }
}

/// `[start, end)` of the local day containing `now`, in UTC.
pub fn local_day(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = now.with_timezone(&tz).date_naive();
    let start = tz
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now);
    (start, start + Duration::days(1))
}

fn in_range(ts: i64, (start, end): (DateTime<Utc>, DateTime<Utc>)) -> bool {
    ts >= start.timestamp() && ts < end.timestamp()
}

pub fn overdue(tasks: &[Task], now: DateTime<Utc>) -> usize {
    tasks
        .iter()
        .filter(|t| !t.is_completed && t.complete_till < now.timestamp())
        .count()
}

/// Due today or created today.
pub fn due_today(tasks: &[Task], day: (DateTime<Utc>, DateTime<Utc>)) -> usize {
    tasks
        .iter()
        .filter(|t| !t.is_completed && (in_range(t.complete_till, day) || in_range(t.created_at, day)))
        .count()
}

pub struct Digests {
    crm: Arc<dyn CrmClient>,
    store: Arc<Store>,
    thresholds: Thresholds,
    tz: Tz,
}

impl Digests {
    pub fn new(crm: Arc<dyn CrmClient>, store: Arc<Store>, thresholds: Thresholds, tz: Tz) -> Self {
        Self {
            crm,
            store,
            thresholds,
            tz,
        }
    }

    pub async fn render(&self, kind: DigestKind) -> Result<String> {
        let now = Utc::now();
        match kind {
            DigestKind::Morning => self.morning(now).await,
            DigestKind::Evening => self.evening(now).await,
            DigestKind::Weekly => self.weekly(now).await,
        }
    }

    async fn leads(&self) -> Result<Vec<Lead>> {
        self.crm.list_leads(&LeadFilter::default()).await
    }

    fn stuck<'a>(&self, leads: &'a [Lead], now: i64) -> Vec<&'a Lead> {
        leads
            .iter()
            .filter(|l| l.staleness_days(now) >= self.thresholds.stuck_days)
            .collect()
    }

    pub async fn morning(&self, now: DateTime<Utc>) -> Result<String> {
        let tasks = self.crm.list_open_tasks().await?;
        let leads = self.leads().await?;
        let day = local_day(now, self.tz);

        let overdue = overdue(&tasks, now);
        let today = due_today(&tasks, day);
        let stuck = self.stuck(&leads, now.timestamp()).len();
        let vip = leads
            .iter()
            .filter(|l| l.price >= self.thresholds.vip_budget)
            .count();

        let mut text = format!("{}\n\nToday:\n\n", greeting(now, self.tz));
        if overdue > 0 {
            text.push_str(&format!("🔴 {overdue} overdue tasks\n"));
        }
        if today > 0 {
            text.push_str(&format!("✅ {today} tasks for today\n"));
        } else {
            text.push_str("✅ No tasks for today\n");
        }
        if stuck > 0 {
            text.push_str(&format!(
                "⚠️ {stuck} deals stuck for more than {} days\n",
                self.thresholds.stuck_days
            ));
        }
        if vip > 0 {
            text.push_str(&format!("🔥 {vip} VIP leads need attention\n"));
        }
        text.push_str("\nCommands:\n/hot — urgent leads\n/risk — stuck deals\n");
        Ok(text)
    }

    pub async fn evening(&self, now: DateTime<Utc>) -> Result<String> {
        let tasks = self.crm.list_open_tasks().await?;
        let day = local_day(now, self.tz);
        let executed = self
            .store
            .count_actions(ActionStatus::Executed, Some(day.0))?;

        let mut text = format!(
            "🌆 Evening report:\n\n✅ Actions executed: {executed}\n📋 Tasks for today: {}\n",
            due_today(&tasks, day)
        );
        let overdue = overdue(&tasks, now);
        if overdue > 0 {
            text.push_str(&format!("🔴 Overdue tasks: {overdue}\n"));
        }
        text.push_str("\nHave a good evening!");
        Ok(text)
    }

    pub async fn weekly(&self, now: DateTime<Utc>) -> Result<String> {
        let leads = self.leads().await?;
        let tasks = self.crm.list_open_tasks().await?;
        let since = now - Duration::days(7);
        let (executed, rejected) = self
            .store
            .blocking(move |s| {
                Ok((
                    s.count_actions(ActionStatus::Executed, Some(since))?,
                    s.count_actions(ActionStatus::Rejected, Some(since))?,
                ))
            })
            .await?;
        Ok(format!(
            "📅 Week overview:\n\n📊 Leads: {} active\n✅ Tasks: {} open\n🎯 Actions executed: {executed}\n❌ Rejected: {rejected}\n",
            leads.len(),
            tasks.len()
        ))
    }

    pub async fn hot(&self, now: DateTime<Utc>) -> Result<String> {
        let leads = self.leads().await?;
        let t = &self.thresholds;
        let vip: Vec<&Lead> = leads.iter().filter(|l| l.price >= t.vip_budget).collect();
        let important: Vec<&Lead> = leads
            .iter()
            .filter(|l| l.price >= t.important_budget && l.price < t.vip_budget)
            .collect();

        if vip.is_empty() && important.is_empty() {
            return Ok("✅ No urgent leads".to_string());
        }
        let now = now.timestamp();
        let mut text = String::from("🔥 Hot leads:\n\n");
        if !vip.is_empty() {
            text.push_str(&format!("🔴 VIP ({}+):\n", t.vip_budget));
            for l in vip.iter().take(HOT_LIMIT) {
                text.push_str(&format!(
                    "• {} — {}\n  Last contact: {} days ago\n",
                    l.name,
                    l.price,
                    l.days_since_update(now)
                ));
            }
            text.push('\n');
        }
        if !important.is_empty() {
            text.push_str(&format!("🟠 Important ({}+):\n", t.important_budget));
            for l in important.iter().take(HOT_LIMIT) {
                text.push_str(&format!(
                    "• {} — {}\n  {} days ago\n",
                    l.name,
                    l.price,
                    l.days_since_update(now)
                ));
            }
        }
        Ok(text)
    }

    pub async fn risk(&self, now: DateTime<Utc>) -> Result<String> {
        let leads = self.leads().await?;
        let now = now.timestamp();
        let stuck = self.stuck(&leads, now);
        if stuck.is_empty() {
            return Ok("✅ No stuck leads!".to_string());
        }
        let mut text = format!("⚠️ Stuck leads ({}):\n\n", stuck.len());
        for (i, l) in stuck.iter().take(RISK_LIMIT).enumerate() {
            text.push_str(&format!(
                "{}. {}\n   {} days without movement\n",
                i + 1,
                l.name,
                l.days_since_update(now)
            ));
            if l.price > 0 {
                text.push_str(&format!("   Budget: {}\n", l.price));
            }
            text.push('\n');
        }
        if stuck.len() > RISK_LIMIT {
            text.push_str(&format!("...and {} more", stuck.len() - RISK_LIMIT));
        }
        Ok(text)
    }

    pub async fn stats(&self) -> Result<String> {
        let (pending, executed, rejected) = self
            .store
            .blocking(|s| {
                Ok((
                    s.count_actions(ActionStatus::Pending, None)?,
                    s.count_actions(ActionStatus::Executed, None)?,
                    s.count_actions(ActionStatus::Rejected, None)?,
                ))
            })
            .await?;
        Ok(format!(
            "📊 Agent stats:\n\nAwaiting approval: {pending}\nExecuted: {executed}\nRejected: {rejected}"
        ))
    }

    /// Score history and recent thoughts for one lead.
    pub async fn details(&self, lead_id: u64) -> Result<String> {
        let (scores, thoughts) = self
            .store
            .blocking(move |s| {
                Ok((
                    s.recent_scores(lead_id, SCORE_HISTORY)?,
                    s.recent_thoughts(lead_id, THOUGHT_HISTORY)?,
                ))
            })
            .await?;

        let mut text = format!("📋 Lead #{lead_id} details\n\n");
        if scores.is_empty() && thoughts.is_empty() {
            text.push_str("No history yet.\n");
        }
        if !scores.is_empty() {
            text.push_str("Score history:\n");
            for s in &scores {
                text.push_str(&format!(
                    "• {}: {} / {}\n",
                    s.calculated_at.with_timezone(&self.tz).format("%Y-%m-%d %H:%M"),
                    s.risk_level,
                    s.priority
                ));
            }
            text.push('\n');
        }
        if !thoughts.is_empty() {
            text.push_str("Recent thoughts:\n");
            for t in &thoughts {
                let preview: String = t.thought.chars().take(THOUGHT_PREVIEW).collect();
                let ellipsis = if t.thought.chars().count() > THOUGHT_PREVIEW { "…" } else { "" };
                text.push_str(&format!("• {preview}{ellipsis}\n"));
            }
        }
        Ok(text)
    }
}

fn greeting(now: DateTime<Utc>, tz: Tz) -> &'static str {
    use chrono::Timelike;
    match now.with_timezone(&tz).hour() {
        0..=11 => "☀️ Good morning!",
        12..=17 => "👋 Good afternoon!",
        _ => "🌆 Good evening!",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionPayload, NewPendingAction};
    use crate::testing::{lead, FakeCrm};
    use crate::types::{Priority, RiskAssessment};

    const DAY: i64 = 86_400;

    fn digests(crm: Arc<FakeCrm>) -> (Digests, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let d = Digests::new(crm, store.clone(), Thresholds::default(), chrono_tz::UTC);
        (d, store)
    }

    fn open_task(id: u64, complete_till: i64, created_at: i64) -> Task {
        Task {
            id,
            entity_id: 1,
            text: "t".into(),
            complete_till,
            is_completed: false,
            created_at,
        }
    }

    #[test]
    fn local_day_respects_timezone() {
        // 2024-03-10 22:30 UTC is already 2024-03-11 in Moscow (UTC+3).
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 22, 30, 0).unwrap();
        let (start, end) = local_day(now, chrono_tz::Europe::Moscow);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 10, 21, 0, 0).unwrap());
        assert_eq!(end - start, Duration::days(1));
    }

    #[test]
    fn task_counters() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let day = local_day(now, chrono_tz::UTC);
        let ts = now.timestamp();
        let tasks = vec![
            open_task(1, ts - DAY, ts - 3 * DAY),
            open_task(2, ts + 3600, ts - 3 * DAY),
            open_task(3, ts + 3 * DAY, ts - 60),
            open_task(4, ts + 3 * DAY, ts - 3 * DAY),
        ];
        assert_eq!(overdue(&tasks, now), 1);
        assert_eq!(due_today(&tasks, day), 2);
    }

    #[tokio::test]
    async fn morning_digest_counts_stuck_and_vip() {
        let now = Utc::now();
        let ts = now.timestamp();
        let crm = Arc::new(FakeCrm::new(vec![
            lead(1, 600_000, ts - DAY),
            lead(2, 0, ts - 9 * DAY),
            lead(3, 0, ts),
        ]));
        crm.set_open_tasks(vec![open_task(1, ts - DAY, ts - 2 * DAY)]);
        let (d, _) = digests(crm);

        let text = d.morning(now).await.unwrap();
        assert!(text.contains("1 overdue tasks"), "{text}");
        assert!(text.contains("1 deals stuck"), "{text}");
        assert!(text.contains("1 VIP leads"), "{text}");
    }

    #[tokio::test]
    async fn hot_splits_vip_and_important() {
        let ts = Utc::now().timestamp();
        let crm = Arc::new(FakeCrm::new(vec![
            lead(1, 700_000, ts),
            lead(2, 150_000, ts),
            lead(3, 10_000, ts),
        ]));
        let (d, _) = digests(crm);
        let text = d.hot(Utc::now()).await.unwrap();
        assert!(text.contains("Lead 1 — 700000"));
        assert!(text.contains("Lead 2 — 150000"));
        assert!(!text.contains("Lead 3"));
    }

    #[tokio::test]
    async fn risk_truncates_long_lists() {
        let ts = Utc::now().timestamp();
        let leads = (1..=12).map(|i| lead(i, 0, ts - 8 * DAY)).collect();
        let (d, _) = digests(Arc::new(FakeCrm::new(leads)));
        let text = d.risk(Utc::now()).await.unwrap();
        assert!(text.starts_with("⚠️ Stuck leads (12)"));
        assert!(text.ends_with("...and 2 more"));
    }

    #[tokio::test]
    async fn empty_lists_get_short_replies() {
        let (d, _) = digests(Arc::new(FakeCrm::new(vec![])));
        assert_eq!(d.hot(Utc::now()).await.unwrap(), "✅ No urgent leads");
        assert_eq!(d.risk(Utc::now()).await.unwrap(), "✅ No stuck leads!");
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let (d, store) = digests(Arc::new(FakeCrm::new(vec![])));
        for _ in 0..2 {
            store
                .insert_action(&NewPendingAction {
                    lead_id: 1,
                    payload: ActionPayload::Wait,
                    risk_score: 10,
                    priority: Priority::Low,
                    reasoning: String::new(),
                })
                .unwrap();
        }
        store.transition_pending(1, ActionStatus::Rejected).unwrap();
        let text = d.stats().await.unwrap();
        assert!(text.contains("Awaiting approval: 1"));
        assert!(text.contains("Rejected: 1"));
    }

    #[tokio::test]
    async fn details_lists_scores_and_thoughts() {
        let (d, store) = digests(Arc::new(FakeCrm::new(vec![])));
        store
            .insert_score(5, &RiskAssessment::fallback(), Utc::now())
            .unwrap();
        store.insert_thought(5, &"x".repeat(150), None).unwrap();
        let text = d.details(5).await.unwrap();
        assert!(text.contains("LOW / LOW"));
        assert!(text.contains(&format!("{}…", "x".repeat(100))));
        assert!(d.details(6).await.unwrap().contains("No history yet."));
    }
}
