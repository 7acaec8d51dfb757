use crate::config::BackoffConfig;
use crate::{Result, SchedulerError};
use kestrel_core::{Pod, PodId};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, PartialEq, Eq)]
struct QueuedPod {
    priority: i32,
    seq: u64,
    pod: PodId,
}

impl Ord for QueuedPod {
    // max-heap: higher priority first, then earlier arrival
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedPod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    active: BinaryHeap<QueuedPod>,
    backoff: HashMap<PodId, (Instant, i32)>,
    queued: HashSet<PodId>,
    attempts: HashMap<PodId, u32>,
    seq: u64,
}

impl QueueInner {
    fn activate(&mut self, pod: PodId, priority: i32) {
        self.seq += 1;
        self.active.push(QueuedPod {
            priority,
            seq: self.seq,
            pod,
        });
    }
}

/// Pending pods ordered by priority, then arrival, with per-pod backoff
#[derive(Debug)]
pub struct SchedulingQueue {
    inner: Mutex<QueueInner>,
    config: BackoffConfig,
}

impl SchedulingQueue {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            config,
        }
    }

    /// Queue a pod for immediate scheduling. A pod already queued or
    /// backing off is left where it is.
    pub fn push(&self, pod: &Pod) {
        let mut inner = self.inner.lock();
        if inner.queued.insert(pod.id.clone()) {
            inner.activate(pod.id.clone(), pod.priority);
        }
    }

    /// Queue a pod after a failed attempt.
    ///
    /// The delay doubles from `initial` up to `max`. Once `max_attempts`
    /// is reached the pod is dropped from the queue.
    pub fn push_backoff(&self, pod: &Pod) -> Result<Duration> {
        let mut inner = self.inner.lock();
        // already waiting in the active heap
        if inner.queued.contains(&pod.id) && !inner.backoff.contains_key(&pod.id) {
            return Ok(Duration::ZERO);
        }
        let attempts = self.count_attempt(&mut inner, pod)?;

        let delay = self.delay_for(attempts);
        inner.queued.insert(pod.id.clone());
        inner
            .backoff
            .insert(pod.id.clone(), (Instant::now() + delay, pod.priority));
        Ok(delay)
    }

    /// Queue a pod for immediate scheduling, counting it as an attempt.
    ///
    /// Used after a preemption whose victims are all gone. The attempt
    /// limit applies as for [`SchedulingQueue::push_backoff`].
    pub fn push_retry(&self, pod: &Pod) -> Result<u32> {
        let mut inner = self.inner.lock();
        if inner.queued.contains(&pod.id) {
            return Ok(inner.attempts.get(&pod.id).copied().unwrap_or(0));
        }
        let attempts = self.count_attempt(&mut inner, pod)?;
        inner.queued.insert(pod.id.clone());
        inner.activate(pod.id.clone(), pod.priority);
        Ok(attempts)
    }

    fn count_attempt(&self, inner: &mut QueueInner, pod: &Pod) -> Result<u32> {
        let attempts = {
            let entry = inner.attempts.entry(pod.id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if attempts >= self.config.max_attempts {
            inner.queued.remove(&pod.id);
            inner.backoff.remove(&pod.id);
            return Err(SchedulerError::backoff_exhausted(pod.id.as_str(), attempts));
        }
        Ok(attempts)
    }

    fn delay_for(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(31);
        self.config
            .initial
            .saturating_mul(1u32 << shift)
            .min(self.config.max)
    }

    /// Pop up to `max` pods that are ready now
    pub fn pop_ready(&self, max: usize) -> Vec<PodId> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let due: Vec<(PodId, i32)> = inner
            .backoff
            .iter()
            .filter(|(_, (ready_at, _))| *ready_at <= now)
            .map(|(pod, (_, priority))| (pod.clone(), *priority))
            .collect();
        for (pod, priority) in due {
            inner.backoff.remove(&pod);
            inner.activate(pod, priority);
        }

        let mut popped = Vec::new();
        while popped.len() < max {
            let Some(next) = inner.active.pop() else {
                break;
            };
            inner.queued.remove(&next.pod);
            popped.push(next.pod);
        }
        popped
    }

    /// Forget a pod entirely (bound or deleted)
    pub fn forget(&self, pod: &PodId) {
        let mut inner = self.inner.lock();
        inner.queued.remove(pod);
        inner.backoff.remove(pod);
        inner.attempts.remove(pod);
        inner.active.retain(|q| &q.pod != pod);
    }

    pub fn attempts(&self, pod: &PodId) -> u32 {
        self.inner.lock().attempts.get(pod).copied().unwrap_or(0)
    }

    pub fn contains(&self, pod: &PodId) -> bool {
        self.inner.lock().queued.contains(pod)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
