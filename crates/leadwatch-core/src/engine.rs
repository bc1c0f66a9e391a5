//! Wires configuration and collaborators into the running components.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::batch::BatchPipeline;
use crate::change::{MemorySeenStore, RedbSeenStore, SeenStore};
use crate::collab::{CrmClient, NotificationGateway, RiskScorer};
use crate::config::Config;
use crate::digest::{DigestKind, Digests};
use crate::error::Result;
use crate::executor::Executor;
use crate::operator::Desk;
use crate::poller::Poller;
use crate::scheduler::{Scheduler, Trigger};
use crate::scoring::LeadAnalyst;
use crate::store::Store;
use crate::workflow::Workflow;

/// Claims older than this are assumed to belong to a crashed process.
const STALE_CLAIM_MINUTES: i64 = 10;

#[derive(Clone)]
pub struct Collaborators {
    pub crm: Arc<dyn CrmClient>,
    pub gateway: Arc<dyn NotificationGateway>,
    pub scorer: Arc<dyn RiskScorer>,
}

pub struct Engine {
    config: Config,
    store: Arc<Store>,
    gateway: Arc<dyn NotificationGateway>,
    workflow: Arc<Workflow>,
    analyst: Arc<LeadAnalyst>,
    desk: Arc<Desk>,
    poller: Arc<Poller>,
}

impl Engine {
    /// Open storage and build every component. `root` resolves relative
    /// storage paths.
    pub fn build(
        root: &Path,
        config: Config,
        collab: Collaborators,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Result<Self> {
        let store = Arc::new(Store::open(root.join(&config.storage.database))?);
        let recovered = store.recover_stale_claims(chrono::Duration::minutes(STALE_CLAIM_MINUTES))?;
        if recovered > 0 {
            warn!(recovered, "stale execution claims marked failed");
        }

        let seen: Arc<dyn SeenStore> = if config.polling.persist_seen {
            Arc::new(RedbSeenStore::open(&root.join(&config.storage.seen_db))?)
        } else {
            Arc::new(MemorySeenStore::new())
        };
        Ok(Self::assemble(config, collab, store, seen, shutdown))
    }

    /// Build around an already-open store; used by tests and one-shot tools.
    pub fn with_store(config: Config, collab: Collaborators, store: Arc<Store>) -> Self {
        Self::assemble(config, collab, store, Arc::new(MemorySeenStore::new()), None)
    }

    fn assemble(
        config: Config,
        collab: Collaborators,
        store: Arc<Store>,
        seen: Arc<dyn SeenStore>,
        shutdown: Option<watch::Receiver<bool>>,
    ) -> Self {
        let operator = config.operator.id.clone();
        if operator.is_none() {
            warn!("operator.id is not set; notifications will be skipped");
        }
        let tz = config.schedule.tz().unwrap_or(chrono_tz::Europe::Moscow);

        let workflow = Arc::new(
            Workflow::new(
                collab.crm.clone(),
                collab.gateway.clone(),
                operator.clone(),
                config.workflow.clone(),
                config.thresholds.clone(),
            )
            .with_score_log(store.clone()),
        );
        let batch = BatchPipeline::new(
            collab.scorer.clone(),
            collab.gateway.clone(),
            store.clone(),
            operator,
            config.workflow.clone(),
            config.thresholds.clone(),
        );
        let mut poller = Poller::new(
            collab.crm.clone(),
            seen,
            workflow.clone(),
            batch,
            config.thresholds.clone(),
            config.polling.batch_size,
        );
        if let Some(rx) = shutdown {
            poller = poller.with_shutdown(rx);
        }

        let executor = Arc::new(Executor::new(collab.crm.clone(), store.clone()));
        let digests = Arc::new(Digests::new(
            collab.crm.clone(),
            store.clone(),
            config.thresholds.clone(),
            tz,
        ));
        let desk = Arc::new(Desk::new(executor, digests, collab.gateway.clone()));
        let analyst = Arc::new(LeadAnalyst::new(collab.crm, collab.scorer, store.clone()));

        Self {
            config,
            store,
            gateway: collab.gateway,
            workflow,
            analyst,
            desk,
            poller: Arc::new(poller),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn NotificationGateway> {
        &self.gateway
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn analyst(&self) -> &Arc<LeadAnalyst> {
        &self.analyst
    }

    pub fn desk(&self) -> &Arc<Desk> {
        &self.desk
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Render a digest and send it to the operator.
    pub async fn send_digest(&self, kind: DigestKind) -> Result<String> {
        let operator = self.config.operator.require_id()?;
        let text = self.desk.digests().render(kind).await?;
        self.gateway.send_message(operator, &text).await?;
        Ok(text)
    }

    /// Poll job plus the three digest jobs. Digest jobs need an operator and
    /// are left out without one.
    pub fn scheduler(self: &Arc<Self>) -> Result<Scheduler> {
        let s = &self.config.schedule;
        let mut scheduler = Scheduler::new(s.tz()?);

        let poller = self.poller.clone();
        scheduler.add(
            "poll",
            Trigger::Every(Duration::from_secs(self.config.polling.interval_secs.max(1))),
            move || {
                let poller = poller.clone();
                async move {
                    if let Err(e) = poller.poll_once().await {
                        error!(error = %e, "poll cycle failed");
                    }
                }
            },
        );

        if self.config.operator.id.is_none() {
            warn!("operator.id is not set; digest jobs are not scheduled");
            return Ok(scheduler);
        }

        let (weekly_day, weekly_at) = s.weekly_at()?;
        let digests = [
            ("morning_digest", Trigger::Daily(s.morning_time()?), DigestKind::Morning),
            ("evening_report", Trigger::Daily(s.evening_time()?), DigestKind::Evening),
            ("weekly_overview", Trigger::Weekly(weekly_day, weekly_at), DigestKind::Weekly),
        ];
        for (name, trigger, kind) in digests {
            let engine = self.clone();
            scheduler.add(name, trigger, move || {
                let engine = engine.clone();
                async move {
                    match engine.send_digest(kind).await {
                        Ok(_) => info!(job = name, "digest sent"),
                        Err(e) => error!(job = name, error = %e, "digest failed"),
                    }
                }
            });
        }
        Ok(scheduler)
    }
}
