use crate::config::SchedulerConfig;
use crate::filter::{FilterOutcome, FilterPipeline};
use crate::preemption::{find_candidate, PreemptionController};
use crate::score::ScoringPipeline;
use crate::state::{ClusterState, SharedState};
use crate::types::{NodeInfo, SchedulingContext};
use crate::{Result, SchedulerError};
use futures_util::future::join_all;
use kestrel_core::{
    ClusterStateProvider, EventEmitter, KestrelError, NodeId, Pod, PodId, PodTerminator,
    SchedulingEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to a pod in one scheduling attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Bound to `node`; pinned pods report a score of zero
    Bound { node: NodeId, score: i64 },
    /// Victims were evicted from `node`; the pod is queued again
    Preempted { node: NodeId, victims: Vec<PodId> },
}

/// Pod scheduler
pub struct Scheduler {
    state: SharedState,
    provider: Arc<dyn ClusterStateProvider>,
    events: Arc<dyn EventEmitter>,
    preemption: PreemptionController,
    filters: FilterPipeline,
    scorers: ScoringPipeline,
    config: SchedulerConfig,
    inflight: Mutex<HashMap<PodId, CancellationToken>>,
}

impl Scheduler {
    /// Create a new scheduler. Plugin lists are resolved here, once.
    pub fn new(
        provider: Arc<dyn ClusterStateProvider>,
        terminator: Arc<dyn PodTerminator>,
        events: Arc<dyn EventEmitter>,
        config: SchedulerConfig,
    ) -> Self {
        let state = Arc::new(ClusterState::new(
            config.backoff.clone(),
            config.binding_capacity,
        ));
        let preemption = PreemptionController::new(
            state.clone(),
            terminator,
            events.clone(),
            config.preemption.clone(),
        );
        let filters = FilterPipeline::from_config(&config.profile);
        let scorers = ScoringPipeline::from_config(&config.profile);

        info!(
            "Scheduler filters: {:?}, scores: {:?}",
            filters.names(),
            scorers.names()
        );

        Self {
            state,
            provider,
            events,
            preemption,
            filters,
            scorers,
            config,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Reload the cluster view from the state provider
    pub async fn refresh(&self) -> Result<()> {
        let snapshot = self.provider.snapshot().await?;
        self.state.load(snapshot);
        Ok(())
    }

    /// Run the scheduler loop until `token` is cancelled.
    ///
    /// State is not reloaded here; call [`Scheduler::refresh`] first.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting scheduler (interval: {:?}, parallelism: {})",
            self.config.schedule_interval, self.config.parallelism
        );

        let mut interval = tokio::time::interval(self.config.schedule_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler shutting down");
                    self.cancel_all();
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.schedule_cycle(&token).await {
                        error!("Scheduling cycle failed: {}", e);
                    }
                }
            }
        }
    }

    /// Run a single scheduling cycle over the pods that are ready now.
    ///
    /// Returns how many pods were bound.
    pub async fn schedule_cycle(&self, token: &CancellationToken) -> Result<usize> {
        let ready = self.state.queue().pop_ready(self.config.parallelism.max(1));
        if ready.is_empty() {
            debug!("No pods ready for scheduling");
            return Ok(0);
        }

        info!("Scheduling {} pods", ready.len());

        let attempts = ready.iter().map(|pod_id| {
            let child = token.child_token();
            self.inflight.lock().insert(pod_id.clone(), child.clone());
            async move {
                let result = self.schedule_pod(pod_id, &child).await;
                self.inflight.lock().remove(pod_id);
                (pod_id, result)
            }
        });

        let mut bound = 0;
        for (pod_id, result) in join_all(attempts).await {
            match result {
                Ok(ScheduleOutcome::Bound { node, .. }) => {
                    debug!("Pod {} bound to {}", pod_id, node);
                    bound += 1;
                }
                Ok(ScheduleOutcome::Preempted { node, victims }) => {
                    debug!(
                        "Pod {} preempted {} pod(s) on {}",
                        pod_id,
                        victims.len(),
                        node
                    );
                }
                Err(e) => self.handle_failure(pod_id, e),
            }
        }

        Ok(bound)
    }

    fn handle_failure(&self, pod_id: &PodId, err: SchedulerError) {
        if let SchedulerError::BackoffExhausted { .. } = err {
            self.give_up(pod_id, &err);
            return;
        }
        if !err.is_retryable() {
            match err {
                SchedulerError::SchedulingCancelled { .. } => {
                    debug!("Scheduling of pod {} cancelled", pod_id);
                }
                other => error!("Failed to schedule pod {}: {}", pod_id, other),
            }
            return;
        }

        let Some(pod) = self.state.pod(pod_id) else {
            return;
        };
        match self.state.queue().push_backoff(&pod) {
            Ok(delay) => {
                debug!("Pod {} requeued in {:?}: {}", pod_id, delay, err);
            }
            Err(exhausted) => self.give_up(pod_id, &exhausted),
        }
    }

    /// The pod ran out of attempts and stays Pending, out of the queue
    fn give_up(&self, pod_id: &PodId, exhausted: &SchedulerError) {
        warn!("{}", exhausted);
        self.events.emit(SchedulingEvent::failed_scheduling(
            pod_id.clone(),
            exhausted.to_string(),
        ));
    }

    /// Filter, score and bind one pod; preempt when nothing fits.
    pub async fn schedule_pod(
        &self,
        pod_id: &PodId,
        token: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        let pod = self
            .state
            .pod(pod_id)
            .ok_or_else(|| KestrelError::pod_not_found(pod_id.as_str()))?;

        if let Some(node) = &pod.bound_node {
            return Ok(ScheduleOutcome::Bound {
                node: node.clone(),
                score: 0,
            });
        }

        if let Some(pinned) = &pod.node_name {
            return self.bind_pinned(&pod, pinned);
        }

        let context = SchedulingContext::new(pod);
        let mut conflicts = 0;

        loop {
            if token.is_cancelled() {
                return Err(SchedulerError::scheduling_cancelled(pod_id.as_str()));
            }

            let nodes = self.state.node_infos();
            let outcome = self.filters.run(&context, &nodes);

            if outcome.eligible.is_empty() {
                return self.handle_unschedulable(&context, &nodes, &outcome, token).await;
            }

            info!(
                "Pod {} has {} feasible nodes",
                pod_id,
                outcome.eligible.len()
            );

            let eligible: Vec<&NodeInfo> = nodes
                .iter()
                .filter(|n| outcome.eligible.contains(n.id()))
                .collect();
            let best = self
                .scorers
                .select_best(&context, &eligible)
                .ok_or_else(|| SchedulerError::internal_error("No nodes scored"))?;

            info!(
                "Selected node {} for pod {} with score {}",
                best.node, pod_id, best.total
            );

            match self.bind(&context.pod, &best.node) {
                Ok(()) => {
                    self.events.emit(SchedulingEvent::scheduled(
                        pod_id.clone(),
                        best.node.clone(),
                        best.total,
                    ));
                    return Ok(ScheduleOutcome::Bound {
                        node: best.node,
                        score: best.total,
                    });
                }
                Err(e @ SchedulerError::BindConflict { .. }) => {
                    conflicts += 1;
                    warn!("{} (attempt {})", e, conflicts);
                    if conflicts > self.config.bind_retry_limit {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reserve on the node's ledger, then record the binding
    fn bind(&self, pod: &Pod, node: &NodeId) -> Result<()> {
        info!("Binding pod {} to node {}", pod.id, node);
        self.state.ledger().try_reserve(node, pod)?;
        if self.state.record_binding(&pod.id, node).is_none() {
            // deleted while we were scoring
            self.state.ledger().release(node, &pod.id);
            return Err(SchedulerError::scheduling_cancelled(pod.id.as_str()));
        }
        info!("Successfully bound pod {} to node {}", pod.id, node);
        Ok(())
    }

    fn bind_pinned(&self, pod: &Pod, node: &NodeId) -> Result<ScheduleOutcome> {
        info!(
            "Pod {} is pinned to node {}, binding without filtering",
            pod.id, node
        );
        self.state.ledger().force_reserve(node, pod)?;
        if self.state.record_binding(&pod.id, node).is_none() {
            self.state.ledger().release(node, &pod.id);
            return Err(SchedulerError::scheduling_cancelled(pod.id.as_str()));
        }
        self.events
            .emit(SchedulingEvent::scheduled(pod.id.clone(), node.clone(), 0));
        Ok(ScheduleOutcome::Bound {
            node: node.clone(),
            score: 0,
        })
    }

    async fn handle_unschedulable(
        &self,
        context: &SchedulingContext,
        nodes: &[NodeInfo],
        outcome: &FilterOutcome,
        token: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        let pod = &context.pod;
        let summary = outcome.summary();
        self.events
            .emit(SchedulingEvent::failed_scheduling(pod.id.clone(), summary.clone()));

        if !pod.can_preempt() || !outcome.is_resource_driven() {
            return Err(SchedulerError::no_suitable_nodes(pod.id.as_str(), summary));
        }

        let candidates = outcome.preemption_candidates();
        let candidate_nodes: Vec<&NodeInfo> = nodes
            .iter()
            .filter(|n| candidates.contains(n.id()))
            .collect();

        let Some(candidate) = find_candidate(pod, &candidate_nodes, &self.state.budgets()) else {
            let reason = format!(
                "no victim set on {} candidate node(s) frees enough resources",
                candidate_nodes.len()
            );
            warn!("Preemption infeasible for pod {}: {}", pod.id, reason);
            self.events.emit(SchedulingEvent::preemption_infeasible(
                pod.id.clone(),
                reason.clone(),
            ));
            return Err(SchedulerError::preemption_infeasible(pod.id.as_str(), reason));
        };

        let exits = self.preemption.preempt(pod, &candidate, token).await?;

        // every retry after a preemption counts against the attempt limit
        if exits.len() == candidate.victims.len() {
            let attempts = self.state.queue().push_retry(pod)?;
            debug!(
                "Victims of pod {} are gone, retrying now (attempt {})",
                pod.id, attempts
            );
        } else {
            let delay = self.state.queue().push_backoff(pod)?;
            info!(
                "{} of {} victim(s) of pod {} still running, retrying in {:?}",
                candidate.victims.len() - exits.len(),
                candidate.victims.len(),
                pod.id,
                delay
            );
        }
        Ok(ScheduleOutcome::Preempted {
            node: candidate.node.clone(),
            victims: candidate.victim_ids(),
        })
    }

    /// Put an evicted pod back in the queue
    pub fn reinject(&self, pod_id: &PodId) -> Option<Pod> {
        self.state.requeue_evicted(pod_id)
    }

    /// Delete a pod. An in-flight attempt for it is cancelled; termination
    /// requests it already issued are left alone.
    pub fn cancel_pod(&self, pod_id: &PodId) -> Option<Pod> {
        if let Some(token) = self.inflight.lock().remove(pod_id) {
            info!("Cancelling in-flight scheduling of pod {}", pod_id);
            token.cancel();
        }
        self.state.remove_pod(pod_id)
    }

    fn cancel_all(&self) {
        for (_, token) in self.inflight.lock().drain() {
            token.cancel();
        }
    }
}
