//! Workload loop: ensures every container of a ready workload has a current
//! report or exactly one scan in flight.

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::{ReconcileContext, ReconcileOutcome, ScanTarget};
use crate::{
    error::{CoreError, Result, ScanError},
    events::OperatorEvent,
    inspect::{self, InvalidContainer},
    model::{ContainerImage, ImageHash, Report, ReportKey, ScanJobRef, WorkloadKey, WorkloadRef},
    scanner::ScanStart,
};

/// What happened to one container during a pass.
#[derive(Clone, Debug, Eq, PartialEq)]
enum ContainerStep {
    UpToDate,
    Parked,
    Scanning,
    StaleJobDeleted,
    Dispatched,
    ReportWritten,
}

#[derive(Debug, Clone)]
pub struct WorkloadReconciler {
    ctx: ReconcileContext,
}

impl WorkloadReconciler {
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(workload = %key), level = "debug")]
    pub async fn reconcile(&self, key: &WorkloadKey) -> Result<ReconcileOutcome> {
        let Some(workload) = self.ctx.workloads.get(key).await? else {
            if self.ctx.workloads.is_gone(key).await? {
                self.collect(key).await?;
            } else {
                debug!(
                    target: "vulnwatch::workload",
                    "workload not observed yet, nothing to collect"
                );
            }
            return Ok(ReconcileOutcome::done());
        };

        if workload.terminating {
            debug!(target: "vulnwatch::workload", "workload terminating, skipping");
            return Ok(ReconcileOutcome::done());
        }
        if !self.ctx.operator.watches(&workload.namespace) {
            debug!(target: "vulnwatch::workload", "namespace not targeted, skipping");
            return Ok(ReconcileOutcome::done());
        }

        let inspection = inspect::inspect(&workload);
        if !inspection.ready {
            debug!(target: "vulnwatch::workload", "workload not ready for scanning");
            return Ok(ReconcileOutcome::done());
        }

        for invalid in &inspection.invalid {
            self.park_invalid(key, invalid).await;
        }

        let wref = inspection.workload;
        let jobs = self.ctx.substrate.list_owned_by(key).await?;
        let deadline = Instant::now() + self.ctx.config.reconcile_timeout();

        let mut outcome = ReconcileOutcome::done();
        let mut failures = Vec::new();

        for (index, container) in wref.containers.iter().enumerate() {
            let in_flight: Vec<&ScanJobRef> = jobs
                .iter()
                .filter(|job| job.container == container.name)
                .collect();

            match self
                .reconcile_container(&wref, index, container, &in_flight, deadline)
                .await
            {
                Ok(ContainerStep::StaleJobDeleted) => {
                    outcome = ReconcileOutcome::requeue(self.ctx.config.stale_job_requeue());
                }
                Ok(step) => {
                    debug!(
                        target: "vulnwatch::workload",
                        container = %container.name,
                        step = ?step,
                        "container reconciled"
                    );
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        target: "vulnwatch::workload",
                        container = %container.name,
                        error = %err,
                        "container scan will be retried"
                    );
                    failures.push(format!("{}: {err}", container.name));
                }
                Err(err) => return Err(err),
            }
        }

        if failures.is_empty() {
            Ok(outcome)
        } else {
            Err(CoreError::Scan(ScanError::Retryable(failures.join("; "))))
        }
    }

    async fn reconcile_container(
        &self,
        wref: &WorkloadRef,
        index: usize,
        container: &ContainerImage,
        in_flight: &[&ScanJobRef],
        deadline: Instant,
    ) -> Result<ContainerStep> {
        let target = ScanTarget::new(&wref.key, &container.name);
        let report_key = ReportKey::new(&wref.key, &container.name);

        if self
            .ctx
            .store
            .exists(&report_key, &container.image_hash)
            .await?
        {
            return Ok(ContainerStep::UpToDate);
        }

        if self
            .ctx
            .ledger
            .terminal_failure(&target, &container.image_hash)
            .is_some()
        {
            return Ok(ContainerStep::Parked);
        }

        let mut stale = false;
        let mut current = false;
        for job in in_flight {
            if job.image_hash == container.image_hash && job.owner.uid == wref.uid {
                current = true;
                continue;
            }
            stale = true;
            if self.ctx.substrate.delete(&job.key).await? {
                info!(
                    target: "vulnwatch::workload",
                    job = %job.key,
                    container = %container.name,
                    "deleted scan job for a superseded image"
                );
                self.publish(OperatorEvent::StaleJobDeleted {
                    job: job.key.clone(),
                    workload: wref.key.clone(),
                    container: container.name.clone(),
                })
                .await;
            }
        }
        if current {
            return Ok(ContainerStep::Scanning);
        }
        if stale {
            return Ok(ContainerStep::StaleJobDeleted);
        }

        let attempt = self
            .ctx
            .ledger
            .attempts(&target, &container.image_hash)
            .saturating_add(1);

        match self.ctx.scanner.start(wref, index, attempt, deadline).await {
            Ok(ScanStart::Completed(scan)) => {
                let report = Report::new(
                    report_key,
                    &wref.uid,
                    container.image.clone(),
                    container.image_hash.clone(),
                    scan,
                )
                .with_operator(self.ctx.operator.build.clone());
                let findings = report.findings.len();
                let report_key = report.key.clone();
                let revision = self.ctx.store.upsert(report).await?;
                self.ctx.ledger.clear(&target);
                info!(
                    target: "vulnwatch::workload",
                    container = %container.name,
                    image_hash = %container.image_hash.short(),
                    findings,
                    revision,
                    "vulnerability report written"
                );
                self.publish(OperatorEvent::ReportWritten {
                    report: report_key,
                    image_hash: container.image_hash.clone(),
                    revision,
                    findings,
                })
                .await;
                Ok(ContainerStep::ReportWritten)
            }
            Ok(ScanStart::Dispatched(job)) => {
                self.ctx
                    .ledger
                    .record_attempt(&target, &container.image_hash, job.attempt);
                info!(
                    target: "vulnwatch::workload",
                    container = %container.name,
                    job = %job.key,
                    attempt = job.attempt,
                    "scan job dispatched"
                );
                self.publish(OperatorEvent::ScanDispatched {
                    workload: wref.key.clone(),
                    container: container.name.clone(),
                    job: job.key,
                    attempt: job.attempt,
                })
                .await;
                Ok(ContainerStep::Dispatched)
            }
            Err(ScanError::Fatal(reason)) => {
                self.park(&target, &container.image_hash, reason).await;
                Ok(ContainerStep::Parked)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn park_invalid(&self, key: &WorkloadKey, invalid: &InvalidContainer) {
        let target = ScanTarget::new(key, &invalid.name);
        // Keyed by the raw reference so fixing the image lifts the failure.
        let hash = ImageHash::new(&invalid.image);
        self.park(&target, &hash, invalid.error.clone()).await;
    }

    async fn park(&self, target: &ScanTarget, image_hash: &ImageHash, reason: String) {
        if !self.ctx.ledger.mark_terminal(target, image_hash, &reason) {
            return;
        }
        warn!(
            target: "vulnwatch::workload",
            container = %target.container,
            reason = %reason,
            "scan failed permanently for this image"
        );
        self.publish(OperatorEvent::ScanFailed {
            workload: target.workload.clone(),
            container: target.container.clone(),
            image_hash: Some(image_hash.clone()),
            reason,
            terminal: true,
        })
        .await;
    }

    /// Deletes everything derived from a workload that no longer exists.
    async fn collect(&self, key: &WorkloadKey) -> Result<()> {
        let mut jobs = 0;
        for job in self.ctx.substrate.list_owned_by(key).await? {
            if self.ctx.substrate.delete(&job.key).await? {
                jobs += 1;
            }
        }
        let reports = self.ctx.store.delete_for_workload(key).await?;
        self.ctx.ledger.forget_workload(key);

        if jobs > 0 || reports > 0 {
            info!(
                target: "vulnwatch::workload",
                workload = %key,
                jobs,
                reports,
                "collected artifacts of deleted workload"
            );
            self.publish(OperatorEvent::WorkloadCollected {
                workload: key.clone(),
                jobs,
                reports,
            })
            .await;
        }
        Ok(())
    }

    async fn publish(&self, event: OperatorEvent) {
        if let Err(err) = self.ctx.events.publish(event).await {
            warn!(target: "vulnwatch::workload", error = %err, "failed to publish event");
        }
    }
}
