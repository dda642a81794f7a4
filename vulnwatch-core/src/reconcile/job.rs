//! Scan-job loop: turns finished scan jobs into reports and cleans up after
//! them.

use tracing::{debug, info, instrument, warn};

use super::{ReconcileContext, ReconcileOutcome, ScanTarget};
use crate::{
    error::{CoreError, Result, ScanError},
    events::OperatorEvent,
    inspect,
    model::{Report, ReportKey, ScanJobKey, ScanJobPhase, ScanJobRef, Workload},
    scanner::ScannerResult,
};

#[derive(Debug, Clone)]
pub struct ScanJobReconciler {
    ctx: ReconcileContext,
}

impl ScanJobReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(job = %key), level = "debug")]
    pub async fn reconcile(&self, key: &ScanJobKey) -> Result<ReconcileOutcome> {
        let Some(job) = self.ctx.substrate.get(key).await? else {
            return Ok(ReconcileOutcome::done());
        };
        if !job.phase.is_terminal() {
            debug!(target: "vulnwatch::job", phase = %job.phase, "scan job still running");
            return Ok(ReconcileOutcome::done());
        }

        let owner = self.ctx.workloads.get(&job.owner.workload).await?;
        let owner = match owner {
            Some(workload)
                if inspect::exists(Some(&workload)) && workload.uid == job.owner.uid =>
            {
                workload
            }
            Some(_) => return self.delete_orphan(&job).await,
            None => {
                if self.ctx.workloads.is_gone(&job.owner.workload).await? {
                    return self.delete_orphan(&job).await;
                }
                debug!(
                    target: "vulnwatch::job",
                    owner = %job.owner.workload,
                    "owner not observed yet, keeping scan job"
                );
                return Ok(ReconcileOutcome::requeue(
                    self.ctx.config.owner_wait_requeue(),
                ));
            }
        };

        let target = ScanTarget::new(&job.owner.workload, &job.container);
        // Restores the attempt count after a restart.
        self.ctx
            .ledger
            .record_attempt(&target, &job.image_hash, job.attempt);

        match job.phase {
            ScanJobPhase::Succeeded => self.succeeded(&job, &owner, &target).await,
            _ => {
                if self.superseded(&job, &owner) {
                    return self.delete_superseded(&job).await;
                }
                let reason = job
                    .failure
                    .clone()
                    .unwrap_or_else(|| "scan job failed".to_string());
                self.failed_attempt(&job, &target, reason).await
            }
        }
    }

    async fn succeeded(
        &self,
        job: &ScanJobRef,
        owner: &Workload,
        target: &ScanTarget,
    ) -> Result<ReconcileOutcome> {
        let report_key = ReportKey::new(&job.owner.workload, &job.container);

        // Report already written by an earlier pass that failed to delete the
        // job: finish the cleanup without rewriting.
        if self.ctx.store.exists(&report_key, &job.image_hash).await? {
            self.ctx.substrate.delete(&job.key).await?;
            debug!(target: "vulnwatch::job", "report already current, job removed");
            return Ok(ReconcileOutcome::done());
        }

        if self.superseded(job, owner) {
            return self.delete_superseded(job).await;
        }

        match self.ctx.scanner.retrieve(job).await {
            ScannerResult::Findings(scan) => {
                let report = Report::new(
                    report_key.clone(),
                    &owner.uid,
                    job.image.clone(),
                    job.image_hash.clone(),
                    scan,
                )
                .with_operator(self.ctx.operator.build.clone());
                let findings = report.findings.len();
                let revision = self.ctx.store.upsert(report).await?;
                self.ctx.ledger.clear(target);
                info!(
                    target: "vulnwatch::job",
                    report = %report_key,
                    image_hash = %job.image_hash.short(),
                    findings,
                    revision,
                    "vulnerability report written"
                );
                self.publish(OperatorEvent::ReportWritten {
                    report: report_key,
                    image_hash: job.image_hash.clone(),
                    revision,
                    findings,
                })
                .await;

                if let Err(err) = self.ctx.substrate.delete(&job.key).await {
                    warn!(
                        target: "vulnwatch::job",
                        error = %err,
                        "report written but scan job could not be deleted"
                    );
                    return Err(err);
                }
                Ok(ReconcileOutcome::done())
            }
            ScannerResult::Retryable(msg) => {
                Err(CoreError::Scan(ScanError::Retryable(msg)))
            }
            ScannerResult::Fatal(msg) => self.failed_attempt(job, target, msg).await,
        }
    }

    /// The owner's container no longer runs the image this job scanned.
    fn superseded(&self, job: &ScanJobRef, owner: &Workload) -> bool {
        let current = inspect::inspect(owner);
        current
            .workload
            .container_named(&job.container)
            .is_none_or(|container| container.image_hash != job.image_hash)
    }

    async fn delete_superseded(&self, job: &ScanJobRef) -> Result<ReconcileOutcome> {
        if self.ctx.substrate.delete(&job.key).await? {
            info!(
                target: "vulnwatch::job",
                container = %job.container,
                "owner image changed, discarding scan job"
            );
            self.publish(OperatorEvent::StaleJobDeleted {
                job: job.key.clone(),
                workload: job.owner.workload.clone(),
                container: job.container.clone(),
            })
            .await;
        }
        Ok(ReconcileOutcome::nudge(job.owner.workload.clone()))
    }

    async fn failed_attempt(
        &self,
        job: &ScanJobRef,
        target: &ScanTarget,
        reason: String,
    ) -> Result<ReconcileOutcome> {
        let budget = self.ctx.config.job_retry_budget;
        let terminal = job.attempt >= budget;

        if terminal {
            self.ctx.ledger.mark_terminal(target, &job.image_hash, &reason);
            warn!(
                target: "vulnwatch::job",
                container = %job.container,
                attempt = job.attempt,
                budget,
                reason = %reason,
                "scan retry budget exhausted"
            );
        } else {
            info!(
                target: "vulnwatch::job",
                container = %job.container,
                attempt = job.attempt,
                budget,
                reason = %reason,
                "scan attempt failed, will dispatch again"
            );
        }

        self.ctx.substrate.delete(&job.key).await?;
        self.publish(OperatorEvent::ScanFailed {
            workload: job.owner.workload.clone(),
            container: job.container.clone(),
            image_hash: Some(job.image_hash.clone()),
            reason,
            terminal,
        })
        .await;

        if terminal {
            Ok(ReconcileOutcome::done())
        } else {
            Ok(ReconcileOutcome::nudge(job.owner.workload.clone()))
        }
    }

    async fn delete_orphan(&self, job: &ScanJobRef) -> Result<ReconcileOutcome> {
        if self.ctx.substrate.delete(&job.key).await? {
            info!(
                target: "vulnwatch::job",
                owner = %job.owner.workload,
                "owner gone, deleted orphaned scan job"
            );
            self.publish(OperatorEvent::OrphanJobDeleted {
                job: job.key.clone(),
                workload: job.owner.workload.clone(),
            })
            .await;
        }
        Ok(ReconcileOutcome::done())
    }

    async fn publish(&self, event: OperatorEvent) {
        if let Err(err) = self.ctx.events.publish(event).await {
            warn!(target: "vulnwatch::job", error = %err, "failed to publish event");
        }
    }
}
