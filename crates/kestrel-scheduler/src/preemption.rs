//! Preemption: choosing lower-priority victims and evicting them
//!
//! Victim selection is a pure function of the preemptor, the node view and
//! the disruption budgets. Termination is asynchronous: every victim gets
//! its own task that asks for graceful termination and falls back to
//! forced removal once the grace period runs out. The preemptor only waits
//! a bounded time for those tasks, and stops waiting when its scheduling
//! attempt is cancelled; the tasks themselves keep running.

use crate::config::PreemptionConfig;
use crate::state::SharedState;
use crate::types::NodeInfo;
use crate::{Result, SchedulerError};
use futures_util::future::join_all;
use kestrel_core::{
    DisruptionBudget, EventEmitter, NodeId, Pod, PodId, PodTerminator, ResourceQuantities,
    SchedulingEvent,
};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Remaining allowed disruptions per budget
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    budgets: Vec<(DisruptionBudget, u32)>,
}

impl BudgetTracker {
    pub fn new(budgets: &[DisruptionBudget]) -> Self {
        Self {
            budgets: budgets
                .iter()
                .map(|b| (b.clone(), b.disruptions_allowed))
                .collect(),
        }
    }

    /// Whether evicting `pod` stays within every budget covering it
    pub fn allows(&self, pod: &Pod) -> bool {
        self.budgets
            .iter()
            .filter(|(budget, _)| budget.covers(pod))
            .all(|(_, remaining)| *remaining > 0)
    }

    fn consume(&mut self, pod: &Pod) {
        for (budget, remaining) in &mut self.budgets {
            if budget.covers(pod) {
                *remaining = remaining.saturating_sub(1);
            }
        }
    }

    fn restore(&mut self, pod: &Pod) {
        for (budget, remaining) in &mut self.budgets {
            if budget.covers(pod) {
                *remaining += 1;
            }
        }
    }
}

/// A node together with the pods that must go for the preemptor to fit
#[derive(Debug, Clone)]
pub struct Candidate {
    pub node: NodeId,
    /// Victims in eviction order
    pub victims: Vec<Pod>,
    /// Capacity left on the node once the victims are gone and the
    /// preemptor is placed
    pub leftover: ResourceQuantities,
}

impl Candidate {
    pub fn victim_ids(&self) -> Vec<PodId> {
        self.victims.iter().map(|v| v.id.clone()).collect()
    }

    fn highest_victim_priority(&self) -> i32 {
        self.victims.iter().map(|v| v.priority).max().unwrap_or(i32::MIN)
    }
}

/// Ascending priority, then ascending freed resources, then pod id
fn victim_order(a: &Pod, b: &Pod) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.requests.ordering_key().cmp(&b.requests.ordering_key()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Pick the victims on one node.
///
/// Only pods with priority strictly below the preemptor are considered.
/// Victims are taken greedily in [`victim_order`] until the preemptor
/// fits, skipping any pod whose eviction would break a disruption budget.
/// A reprieve pass then walks the chosen victims in reverse and spares
/// every pod the preemptor can do without. Returns `None` when even
/// evicting every eligible pod is not enough.
pub fn select_victims(
    preemptor: &Pod,
    node: &NodeInfo,
    budgets: &BudgetTracker,
) -> Option<Candidate> {
    let mut budgets = budgets.clone();
    let mut potential: Vec<&Pod> = node
        .pods
        .iter()
        .filter(|p| p.priority < preemptor.priority && p.id != preemptor.id)
        .collect();
    potential.sort_by(|a, b| victim_order(a, b));

    let mut available = node.available();
    let mut victims: Vec<Pod> = Vec::new();

    for pod in potential {
        if preemptor.requests.fits_within(&available) {
            break;
        }
        if !budgets.allows(pod) {
            debug!(
                "Pod {} on node {} is protected by a disruption budget",
                pod.id,
                node.id()
            );
            continue;
        }
        budgets.consume(pod);
        available = available.add(&pod.requests);
        victims.push(pod.clone());
    }

    if !preemptor.requests.fits_within(&available) {
        return None;
    }

    // reprieve, most important victims first
    let mut index = victims.len();
    while index > 0 {
        index -= 1;
        let without = available.sub(&victims[index].requests);
        if preemptor.requests.fits_within(&without) {
            let spared = victims.remove(index);
            budgets.restore(&spared);
            available = without;
        }
    }

    Some(Candidate {
        node: node.id().clone(),
        victims,
        leftover: available.sub(&preemptor.requests),
    })
}

/// Order candidates: fewest victims, then most leftover capacity, then the
/// least important highest victim, then node id
fn candidate_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.victims
        .len()
        .cmp(&b.victims.len())
        .then_with(|| Reverse(a.leftover.ordering_key()).cmp(&Reverse(b.leftover.ordering_key())))
        .then_with(|| a.highest_victim_priority().cmp(&b.highest_victim_priority()))
        .then_with(|| a.node.cmp(&b.node))
}

/// Best candidate among `nodes`, or `None` when preemption is infeasible
pub fn find_candidate(
    preemptor: &Pod,
    nodes: &[&NodeInfo],
    budgets: &[DisruptionBudget],
) -> Option<Candidate> {
    let tracker = BudgetTracker::new(budgets);
    nodes
        .iter()
        .filter_map(|node| select_victims(preemptor, node, &tracker))
        .min_by(candidate_order)
}

/// How one victim left its node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimExit {
    Terminated,
    ForceRemoved,
}

/// Issues victim terminations and waits for them, bounded
pub struct PreemptionController {
    state: SharedState,
    terminator: Arc<dyn PodTerminator>,
    events: Arc<dyn EventEmitter>,
    config: PreemptionConfig,
    /// Victims with a termination task still running
    terminating: Arc<Mutex<HashSet<PodId>>>,
}

impl PreemptionController {
    pub fn new(
        state: SharedState,
        terminator: Arc<dyn PodTerminator>,
        events: Arc<dyn EventEmitter>,
        config: PreemptionConfig,
    ) -> Self {
        Self {
            state,
            terminator,
            events,
            config,
            terminating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Start terminating the candidate's victims and wait for them.
    ///
    /// Returns once every victim is gone or the bounded wait elapsed; the
    /// returned exits cover only the victims that left within the wait. A
    /// victim whose termination is already under way is not terminated
    /// again and is not waited for. Cancelling `token` stops the wait with
    /// `SchedulingCancelled`; termination requests already issued are not
    /// affected.
    pub async fn preempt(
        &self,
        preemptor: &Pod,
        candidate: &Candidate,
        token: &CancellationToken,
    ) -> Result<Vec<(PodId, VictimExit)>> {
        info!(
            "Preempting {} pod(s) on node {} for pod {}: {:?}",
            candidate.victims.len(),
            candidate.node,
            preemptor.id,
            candidate.victim_ids()
        );

        let handles: Vec<_> = candidate
            .victims
            .iter()
            .filter(|victim| {
                let fresh = self.terminating.lock().insert(victim.id.clone());
                if !fresh {
                    debug!("Pod {} is already being terminated", victim.id);
                }
                fresh
            })
            .map(|victim| {
                self.events.emit(SchedulingEvent::preempted(
                    victim.id.clone(),
                    candidate.node.clone(),
                    &preemptor.id,
                ));
                self.spawn_termination(victim.clone())
            })
            .collect();

        let wait = join_all(handles);
        tokio::select! {
            _ = token.cancelled() => {
                info!("Preemption wait for pod {} cancelled", preemptor.id);
                Err(SchedulerError::scheduling_cancelled(preemptor.id.as_str()))
            }
            result = tokio::time::timeout(self.config.max_wait(), wait) => {
                match result {
                    Ok(results) => {
                        let mut exits = Vec::new();
                        for joined in results {
                            match joined {
                                Ok(exit) => exits.push(exit),
                                Err(e) => warn!("Victim termination task failed: {}", e),
                            }
                        }
                        Ok(exits)
                    }
                    Err(_) => {
                        warn!(
                            "Victims of pod {} on node {} did not finish within {:?}",
                            preemptor.id,
                            candidate.node,
                            self.config.max_wait()
                        );
                        Ok(Vec::new())
                    }
                }
            }
        }
    }

    fn spawn_termination(&self, victim: Pod) -> tokio::task::JoinHandle<(PodId, VictimExit)> {
        let terminator = self.terminator.clone();
        let state = self.state.clone();
        let terminating = self.terminating.clone();
        let grace = self.config.termination_grace;

        tokio::spawn(async move {
            let graceful =
                tokio::time::timeout(grace, terminator.terminate(&victim, grace)).await;
            let exit = match graceful {
                Ok(Ok(())) => VictimExit::Terminated,
                Ok(Err(e)) => {
                    warn!("Graceful termination of pod {} failed: {}", victim.id, e);
                    force(&*terminator, &victim).await
                }
                Err(_) => {
                    warn!(
                        "Pod {} did not terminate within {:?}, forcing removal",
                        victim.id, grace
                    );
                    force(&*terminator, &victim).await
                }
            };
            state.requeue_evicted(&victim.id);
            terminating.lock().remove(&victim.id);
            (victim.id, exit)
        })
    }
}

async fn force(terminator: &dyn PodTerminator, victim: &Pod) -> VictimExit {
    if let Err(e) = terminator.force_remove(victim).await {
        warn!("Forced removal of pod {} failed: {}", victim.id, e);
    }
    VictimExit::ForceRemoved
}
