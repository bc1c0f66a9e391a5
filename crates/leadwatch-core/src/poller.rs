//! One poll cycle: fetch, filter, detect changes, route, process.
//!
//! Cycles are serialized: a cycle requested while another is running is
//! skipped. Failures for one lead or one batch are logged and counted; only
//! a failed lead fetch ends a cycle early.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{info, info_span, warn, Instrument};

use crate::attention::needs_attention;
use crate::batch::BatchPipeline;
use crate::change::{ChangeDetector, SeenStore};
use crate::collab::CrmClient;
use crate::config::Thresholds;
use crate::error::Result;
use crate::router::{batches, route};
use crate::types::Lead;
use crate::workflow::Workflow;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub attention: usize,
    pub changed: usize,
    pub critical: usize,
    pub normal: usize,
    pub workflows_failed: usize,
    pub batches: usize,
    pub actions_created: Vec<i64>,
    /// Shutdown was requested before all work was done.
    pub interrupted: bool,
}

pub struct Poller {
    crm: Arc<dyn CrmClient>,
    detector: ChangeDetector<dyn SeenStore>,
    workflow: Arc<Workflow>,
    batch: BatchPipeline,
    thresholds: Thresholds,
    batch_size: usize,
    running: Mutex<()>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Poller {
    pub fn new(
        crm: Arc<dyn CrmClient>,
        seen: Arc<dyn SeenStore>,
        workflow: Arc<Workflow>,
        batch: BatchPipeline,
        thresholds: Thresholds,
        batch_size: usize,
    ) -> Self {
        Self {
            crm,
            detector: ChangeDetector::new(seen),
            workflow,
            batch,
            thresholds,
            batch_size,
            running: Mutex::new(()),
            shutdown: None,
        }
    }

    /// Stop between leads and batches once `rx` reads `true`.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(rx);
        self
    }

    fn stopping(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Leads only count as seen once handled, so an interrupted cycle leaves
    /// the rest for the next one.
    fn mark_seen(&self, leads: &[Lead]) {
        for lead in leads {
            if let Err(e) = self.detector.commit(lead) {
                warn!(lead_id = lead.id, error = %e, "failed to record lead as seen");
            }
        }
    }

    /// Run one cycle. `Ok(None)` means a cycle was already running.
    pub async fn poll_once(&self) -> Result<Option<CycleReport>> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("previous poll cycle still running, skipping");
            return Ok(None);
        };
        let span = info_span!("poll", cycle = %uuid::Uuid::new_v4());
        self.cycle().instrument(span).await.map(Some)
    }

    async fn cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let now = Utc::now().timestamp();

        let leads = self.crm.list_leads(&Default::default()).await?;
        report.fetched = leads.len();

        let flagged: Vec<_> = leads
            .into_iter()
            .filter(|l| needs_attention(l, now, &self.thresholds))
            .collect();
        report.attention = flagged.len();

        let changed = self.detector.filter_changed(flagged)?;
        report.changed = changed.len();
        info!(
            fetched = report.fetched,
            attention = report.attention,
            changed = report.changed,
            "leads filtered"
        );
        if changed.is_empty() {
            return Ok(report);
        }

        let routed = route(changed, now, &self.thresholds);
        report.critical = routed.critical.len();
        report.normal = routed.normal.len();

        for lead in &routed.critical {
            if self.stopping() {
                report.interrupted = true;
                return Ok(report);
            }
            match self.workflow.process(lead.id).await {
                Ok(_) => self.mark_seen(std::slice::from_ref(lead)),
                // Left unseen so the next cycle retries it.
                Err(e) => {
                    warn!(lead_id = lead.id, error = %e, "workflow failed");
                    report.workflows_failed += 1;
                }
            }
        }

        for (i, chunk) in batches(&routed.normal, self.batch_size).enumerate() {
            if self.stopping() {
                report.interrupted = true;
                return Ok(report);
            }
            let batch_report = self
                .batch
                .process(chunk, now)
                .instrument(info_span!("batch", batch = i + 1))
                .await;
            self.mark_seen(chunk);
            report.batches += 1;
            report.actions_created.extend(batch_report.actions);
        }

        info!(
            critical = report.critical,
            normal = report.normal,
            actions = report.actions_created.len(),
            "poll cycle complete"
        );
        Ok(report)
    }
}
