use std::{fmt, hash::Hash, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{RetryPolicy, WorkQueue, WorkloadCache};
use crate::{
    config::OperatorConfig,
    error::{CoreError, Result},
    events::EventPublisher,
    model::{ScanJobKey, ScanJobRef, Workload, WorkloadKey},
    reconcile::{
        Action, ReconcileContext, ReconcileOutcome, ScanJobReconciler, ScanLedger,
        TerminalFailure, WorkloadReconciler,
    },
    registry::KindRegistry,
    scanner::{self, RandomNameGenerator, Scanner, ScannerSelection},
    store::ReportStore,
    substrate::ExecutionSubstrate,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ObservationKind {
    Added,
    Modified,
    Deleted,
}

/// A workload change reported by the watch layer. Delivery is
/// at-least-once and may be reordered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadObservation {
    pub kind: ObservationKind,
    pub workload: Workload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobObservation {
    pub kind: ObservationKind,
    pub job: ScanJobRef,
}

/// One of the two control loops, as seen by the worker pool.
#[async_trait]
trait ControlLoop: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static;

    const NAME: &'static str;

    async fn reconcile(&self, key: &Self::Key) -> Result<ReconcileOutcome>;
}

#[async_trait]
impl ControlLoop for WorkloadReconciler {
    type Key = WorkloadKey;

    const NAME: &'static str = "workload";

    async fn reconcile(&self, key: &WorkloadKey) -> Result<ReconcileOutcome> {
        WorkloadReconciler::reconcile(self, key).await
    }
}

#[async_trait]
impl ControlLoop for ScanJobReconciler {
    type Key = ScanJobKey;

    const NAME: &'static str = "scan-job";

    async fn reconcile(&self, key: &ScanJobKey) -> Result<ReconcileOutcome> {
        ScanJobReconciler::reconcile(self, key).await
    }
}

/// Shared handles a worker needs besides its own loop.
#[derive(Clone)]
struct WorkerEnv {
    workload_queue: Arc<WorkQueue<WorkloadKey>>,
    reconcile_timeout: Duration,
    shutdown: CancellationToken,
}

/// Owns both control loops and their worker pools.
pub struct Operator {
    config: OperatorConfig,
    cache: Arc<WorkloadCache>,
    substrate: Arc<dyn ExecutionSubstrate>,
    ledger: Arc<ScanLedger>,
    workloads: Arc<WorkloadReconciler>,
    jobs: Arc<ScanJobReconciler>,
    workload_queue: Arc<WorkQueue<WorkloadKey>>,
    job_queue: Arc<WorkQueue<ScanJobKey>>,
    workload_retry: Arc<RetryPolicy<WorkloadKey>>,
    job_retry: Arc<RetryPolicy<ScanJobKey>>,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("ledger", &self.ledger)
            .field("cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

/// Rejects configurations no reconciler can run with.
pub fn validate_config(config: &OperatorConfig) -> Result<ScannerSelection> {
    let selection = ScannerSelection::from_config(config)?;
    if config.reconciler.workload_workers == 0 {
        return Err(CoreError::Config("workload_workers must be at least 1".into()));
    }
    if config.reconciler.job_workers == 0 {
        return Err(CoreError::Config("job_workers must be at least 1".into()));
    }
    if config.reconciler.job_retry_budget == 0 {
        return Err(CoreError::Config("job_retry_budget must be at least 1".into()));
    }
    Ok(selection)
}

impl Operator {
    /// Wires an operator around an already built scanner. The scanner must
    /// match the backend the configuration enables.
    pub fn new(
        config: OperatorConfig,
        substrate: Arc<dyn ExecutionSubstrate>,
        store: Arc<dyn ReportStore>,
        scanner: Scanner,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let selection = validate_config(&config)?;
        let matches = match selection {
            ScannerSelection::Trivy => matches!(scanner, Scanner::Job(_)),
            ScannerSelection::AquaCsp => matches!(scanner, Scanner::Api(_)),
        };
        if !matches {
            return Err(CoreError::Config(format!(
                "configured scanner {selection:?} does not match provided {}",
                scanner.id()
            )));
        }

        let cache = Arc::new(WorkloadCache::new());
        let ledger = Arc::new(ScanLedger::new());
        let ctx = ReconcileContext {
            workloads: cache.clone(),
            substrate: substrate.clone(),
            store,
            scanner: Arc::new(scanner),
            ledger: ledger.clone(),
            events,
            operator: config.operator.clone(),
            config: config.reconciler.clone(),
        };

        info!(
            scanner = ctx.scanner.id(),
            workload_workers = config.reconciler.workload_workers,
            job_workers = config.reconciler.job_workers,
            "operator configured"
        );

        Ok(Self {
            cache,
            substrate,
            ledger,
            workloads: Arc::new(WorkloadReconciler::new(ctx.clone())),
            jobs: Arc::new(ScanJobReconciler::new(ctx)),
            workload_queue: Arc::new(WorkQueue::new("workloads")),
            job_queue: Arc::new(WorkQueue::new("scan-jobs")),
            workload_retry: Arc::new(RetryPolicy::new(config.retry)),
            job_retry: Arc::new(RetryPolicy::new(config.retry)),
            shutdown_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Builds the configured scanner with production collaborators.
    pub fn from_config(
        config: OperatorConfig,
        substrate: Arc<dyn ExecutionSubstrate>,
        store: Arc<dyn ReportStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let scanner = scanner::build_scanner(
            &config,
            substrate.clone(),
            Arc::new(KindRegistry::default()),
            Arc::new(RandomNameGenerator::new()),
        )?;
        Self::new(config, substrate, store, scanner, events)
    }

    /// Spawns the worker pools and enqueues the current state of the world.
    pub async fn start(&self) -> Result<()> {
        let env = WorkerEnv {
            workload_queue: Arc::clone(&self.workload_queue),
            reconcile_timeout: self.config.reconciler.reconcile_timeout(),
            shutdown: self.shutdown_token.clone(),
        };

        let mut handles = self.handles.lock().await;
        handles.extend(spawn_worker_pool(
            Arc::clone(&self.workloads),
            Arc::clone(&self.workload_queue),
            Arc::clone(&self.workload_retry),
            env.clone(),
            self.config.reconciler.workload_workers,
        ));
        handles.extend(spawn_worker_pool(
            Arc::clone(&self.jobs),
            Arc::clone(&self.job_queue),
            Arc::clone(&self.job_retry),
            env,
            self.config.reconciler.job_workers,
        ));
        drop(handles);

        self.resync().await
    }

    pub async fn observe_workload(&self, observation: WorkloadObservation) {
        let key = observation.workload.key();
        match observation.kind {
            ObservationKind::Added | ObservationKind::Modified => {
                if !self.cache.upsert(observation.workload) {
                    debug!(workload = %key, "ignoring outdated workload observation");
                    return;
                }
            }
            ObservationKind::Deleted => {
                if !self.cache.delete(&observation.workload) {
                    debug!(workload = %key, "deletion does not match the cached incarnation");
                }
            }
        }
        self.workload_queue.add(key).await;
    }

    pub async fn observe_job(&self, observation: JobObservation) {
        match observation.kind {
            ObservationKind::Deleted => {
                self.workload_queue.add(observation.job.owner.workload).await;
            }
            ObservationKind::Added | ObservationKind::Modified => {
                self.job_queue.add(observation.job.key).await;
            }
        }
    }

    /// Called by the watch layer once its initial listing has been replayed
    /// through [`observe_workload`](Self::observe_workload). From then on a
    /// workload missing from the cache counts as deleted, so jobs and
    /// reports of workloads that vanished while the operator was down are
    /// cleaned up by the resync that follows.
    pub async fn mark_workloads_synced(&self) -> Result<()> {
        self.cache.mark_synced();
        info!(workloads = self.cache.len(), "workload cache synced");
        self.resync().await
    }

    /// Enqueues every known workload and every existing scan job. This is
    /// the restart path: no in-memory state is needed to resume. Before the
    /// cache is synced, jobs whose owner has not been observed are kept and
    /// revisited later.
    pub async fn resync(&self) -> Result<()> {
        let workloads = self.cache.keys();
        let jobs = self.substrate.list().await?;
        info!(workloads = workloads.len(), jobs = jobs.len(), "resyncing");

        for key in workloads {
            self.workload_queue.add(key).await;
        }
        for job in jobs {
            self.job_queue.add(job.key).await;
        }
        Ok(())
    }

    pub fn terminal_failures(&self) -> Vec<TerminalFailure> {
        self.ledger.terminal_failures()
    }

    pub fn cache(&self) -> &Arc<WorkloadCache> {
        &self.cache
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Stops both loops and waits for in-flight reconciles to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.workload_queue.shutdown().await;
        self.job_queue.shutdown().await;

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(err) = result {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        info!("operator stopped");
    }
}

fn spawn_worker_pool<L: ControlLoop>(
    control: Arc<L>,
    queue: Arc<WorkQueue<L::Key>>,
    retry: Arc<RetryPolicy<L::Key>>,
    env: WorkerEnv,
    parallelism: usize,
) -> Vec<JoinHandle<()>> {
    (0..parallelism)
        .map(|i| {
            let worker_id = format!("{}-w{}", L::NAME, i);
            let control = Arc::clone(&control);
            let queue = Arc::clone(&queue);
            let retry = Arc::clone(&retry);
            let env = env.clone();

            tokio::spawn(async move {
                loop {
                    let key = tokio::select! {
                        _ = env.shutdown.cancelled() => break,
                        key = queue.get() => match key {
                            Some(key) => key,
                            None => break,
                        },
                    };

                    let result =
                        match tokio::time::timeout(env.reconcile_timeout, control.reconcile(&key))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(CoreError::Timeout(format!(
                                "{} reconcile of {key} exceeded {:?}",
                                L::NAME,
                                env.reconcile_timeout
                            ))),
                        };
                    queue.done(&key).await;

                    match result {
                        Ok(outcome) => {
                            retry.reset(&key);
                            if let Some(workload) = outcome.follow_up {
                                env.workload_queue.add(workload).await;
                            }
                            if let Action::Requeue(after) = outcome.action {
                                queue.add_after(key, after);
                            }
                        }
                        Err(err) if err.is_retryable() => {
                            let delay = retry.next_delay(&key);
                            warn!(
                                worker = %worker_id,
                                key = %key,
                                error = %err,
                                retry_in_ms = delay.as_millis() as u64,
                                "reconcile failed, backing off"
                            );
                            queue.add_after(key, delay);
                        }
                        Err(err) => {
                            retry.reset(&key);
                            error!(
                                worker = %worker_id,
                                key = %key,
                                error = %err,
                                "reconcile failed permanently"
                            );
                        }
                    }
                }
                debug!(worker = %worker_id, "worker shutting down");
            })
        })
        .collect()
}
