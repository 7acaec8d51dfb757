use kestrel_core::{
    ClusterSnapshot, ConditionStatus, Node, NodeCondition, NodeId, Pod, PodId, PodPhase,
    ResourceQuantities, SchedulingEventKind, Taint, TaintEffect, Toleration, TAINT_NODE_NOT_READY,
};
use kestrel_eviction::{
    EvictedPod, EvictionConfig, EvictionHandle, EvictionManager, TimerState,
};
use kestrel_scheduler::mock::{MockTerminator, RecordingEventEmitter};
use kestrel_scheduler::{BackoffConfig, ClusterState, SharedState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

struct Harness {
    state: SharedState,
    handle: EvictionHandle,
    evicted: mpsc::Receiver<EvictedPod>,
    terminator: MockTerminator,
    events: Arc<RecordingEventEmitter>,
    token: CancellationToken,
    start: Instant,
}

impl Harness {
    fn start() -> Self {
        Self::with_state(ClusterSnapshot::new(vec![node("node1")], Vec::new()), 16)
    }

    /// Start a manager over a state loaded from `snapshot`
    fn with_state(snapshot: ClusterSnapshot, binding_capacity: usize) -> Self {
        let state = Arc::new(ClusterState::new(BackoffConfig::default(), binding_capacity));
        state.load(snapshot);

        let terminator = MockTerminator::new();
        let events = Arc::new(RecordingEventEmitter::new());
        let (manager, handle, evicted) = EvictionManager::new(
            EvictionConfig::default(),
            state.clone(),
            Arc::new(terminator.clone()),
            events.clone(),
        );
        let token = CancellationToken::new();
        tokio::spawn(manager.run(token.clone()));
        Self {
            state,
            handle,
            evicted,
            terminator,
            events,
            token,
            start: Instant::now(),
        }
    }

    fn taint(&self, taints: Vec<Taint>) {
        self.state.set_node_taints(&node1(), taints);
    }

    async fn at(&self, secs: u64) {
        sleep_until(self.start + Duration::from_secs(secs)).await;
    }

    /// Wait for every command sent so far to be handled
    async fn settle(&self) {
        self.handle.timers().await.unwrap();
    }

    async fn next_eviction(&mut self) -> EvictedPod {
        self.evicted.recv().await.unwrap()
    }

    /// Assert that `secs` have passed, within the timer resolution
    fn assert_elapsed(&self, secs: u64) {
        let elapsed = self.start.elapsed();
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(10),
            "expected {:?}, got {:?}",
            expected,
            elapsed
        );
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn no_execute(key: &str, value: Option<&str>) -> Taint {
    Taint::new(key, value, TaintEffect::NoExecute)
}

fn web_pod() -> Pod {
    Pod::new("default/web", ResourceQuantities::new(100, 1 << 20))
}

fn node1() -> NodeId {
    NodeId::from("node1")
}

fn node(name: &str) -> Node {
    Node::new(name, ResourceQuantities::new(4000, 8 << 30))
}

#[tokio::test(start_paused = true)]
async fn test_added_exists_toleration_cancels_and_removing_it_rearms() {
    let mut h = Harness::start();
    let bounded = web_pod().with_toleration(
        Toleration::equal("key1", "v1", Some(TaintEffect::NoExecute)).for_seconds(300),
    );
    let forever = bounded
        .clone()
        .with_toleration(Toleration::exists("key1", Some(TaintEffect::NoExecute)));

    h.handle.pod_bound(bounded.clone(), node1()).await.unwrap();
    h.taint(vec![no_execute("key1", Some("v1"))]);
    let armed = h.handle.armed().await.unwrap();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].deadline - armed[0].armed_at, Duration::from_secs(300));

    h.at(100).await;
    h.handle.pod_updated(forever).await.unwrap();
    let timers = h.handle.timers().await.unwrap();
    assert_eq!(timers[0].state, TimerState::Cancelled);

    // past the original deadline, nothing happened
    h.at(340).await;
    assert!(h.evicted.try_recv().is_err());

    h.at(350).await;
    h.handle.pod_updated(bounded).await.unwrap();
    let armed = h.handle.armed().await.unwrap();
    assert_eq!(armed.len(), 1);
    assert!(armed[0].armed_at >= h.start + Duration::from_secs(350));
    assert_eq!(armed[0].deadline - armed[0].armed_at, Duration::from_secs(300));

    h.at(400).await;
    assert!(h.evicted.try_recv().is_err());
    assert!(h.terminator.removed().await.is_empty());

    let evicted = h.next_eviction().await;
    assert_eq!(evicted.pod.id, PodId::from("default/web"));
    assert_eq!(evicted.node, node1());
    h.assert_elapsed(650);
    assert_eq!(h.terminator.force_removed().await, vec![PodId::from("default/web")]);

    assert_eq!(h.events.of_kind(SchedulingEventKind::EvictionArmed).len(), 2);
    assert_eq!(h.events.of_kind(SchedulingEventKind::EvictionCancelled).len(), 1);
    assert_eq!(h.events.of_kind(SchedulingEventKind::Evicted).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_toleration_seconds_evicts_immediately() {
    let mut h = Harness::start();
    let pod = web_pod().with_toleration(
        Toleration::exists("key1", Some(TaintEffect::NoExecute)).for_seconds(0),
    );

    h.handle.pod_bound(pod, node1()).await.unwrap();
    h.taint(vec![no_execute("key1", None)]);

    let evicted = h.next_eviction().await;
    assert_eq!(evicted.taint.key, "key1");
    h.assert_elapsed(0);
}

#[tokio::test(start_paused = true)]
async fn test_untolerated_taint_evicts_immediately() {
    let mut h = Harness::start();

    h.taint(vec![no_execute("maintenance", None)]);
    h.handle.pod_bound(web_pod(), node1()).await.unwrap();

    h.next_eviction().await;
    h.assert_elapsed(0);
}

#[tokio::test(start_paused = true)]
async fn test_exists_toleration_without_seconds_never_arms() {
    let mut h = Harness::start();
    let pod = web_pod().with_toleration(Toleration::exists("key1", Some(TaintEffect::NoExecute)));

    h.handle.pod_bound(pod, node1()).await.unwrap();
    h.taint(vec![no_execute("key1", Some("v1"))]);

    assert!(h.handle.timers().await.unwrap().is_empty());
    h.at(10_000).await;
    assert!(h.evicted.try_recv().is_err());
    assert!(h.events.of_kind(SchedulingEventKind::EvictionArmed).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_not_ready_node_uses_implicit_default() {
    let mut h = Harness::start();
    let mut node = node("node1");
    node.conditions = vec![NodeCondition::ready(ConditionStatus::False)];

    h.handle.pod_bound(web_pod(), node1()).await.unwrap();
    let applied = h.handle.node_status(&node);
    assert_eq!(applied[0].key, TAINT_NODE_NOT_READY);

    let evicted = h.next_eviction().await;
    assert_eq!(evicted.taint.key, TAINT_NODE_NOT_READY);
    h.assert_elapsed(300);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_condition_toleration_overrides_default() {
    let mut h = Harness::start();
    let pod = web_pod().with_toleration(
        Toleration::exists(TAINT_NODE_NOT_READY, Some(TaintEffect::NoExecute)).for_seconds(60),
    );

    h.handle.pod_bound(pod, node1()).await.unwrap();
    h.taint(vec![no_execute(TAINT_NODE_NOT_READY, None)]);

    h.next_eviction().await;
    h.assert_elapsed(60);
}

#[tokio::test(start_paused = true)]
async fn test_recovered_node_cancels_pending_eviction() {
    let mut h = Harness::start();
    let mut node = node("node1");
    node.conditions = vec![NodeCondition::ready(ConditionStatus::Unknown)];

    h.handle.pod_bound(web_pod(), node1()).await.unwrap();
    node.taints = h.handle.node_status(&node);
    h.settle().await;

    h.at(120).await;
    node.conditions = vec![NodeCondition::ready(ConditionStatus::True)];
    let applied = h.handle.node_status(&node);
    assert!(applied.is_empty());

    h.at(1_000).await;
    assert!(h.evicted.try_recv().is_err());
    let timers = h.handle.timers().await.unwrap();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].state, TimerState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_pinned_pod_is_still_evicted_after_grace() {
    let mut h = Harness::start();
    let pod = web_pod()
        .pinned_to("node1")
        .bound_to("node1")
        .with_toleration(Toleration::exists("key1", Some(TaintEffect::NoExecute)).for_seconds(30));

    h.handle.pod_bound(pod, node1()).await.unwrap();
    h.taint(vec![no_execute("key1", None)]);

    let evicted = h.next_eviction().await;
    assert_eq!(evicted.pod.node_name, Some(node1()));
    assert!(evicted.pod.bound_node.is_none());
    h.assert_elapsed(30);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_at_deadline_is_exclusive_with_fire() {
    let mut h = Harness::start();
    let pod = web_pod()
        .with_toleration(Toleration::exists("key1", Some(TaintEffect::NoExecute)).for_seconds(30));

    h.handle.pod_bound(pod, node1()).await.unwrap();
    h.taint(vec![no_execute("key1", None)]);
    h.settle().await;

    h.at(30).await;
    h.taint(Vec::new());
    let timers = h.handle.timers().await.unwrap();
    assert_eq!(timers.len(), 1);

    let cancelled = h.events.of_kind(SchedulingEventKind::EvictionCancelled).len();
    let fired = h.events.of_kind(SchedulingEventKind::Evicted).len();
    assert_eq!(cancelled + fired, 1);
    match timers[0].state {
        TimerState::Cancelled => assert!(h.evicted.try_recv().is_err()),
        TimerState::Fired => {
            h.next_eviction().await;
        }
        TimerState::Armed => panic!("timer still armed after its deadline"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_deleted_pod_is_never_evicted() {
    let mut h = Harness::start();

    h.handle.pod_bound(web_pod(), node1()).await.unwrap();
    h.taint(vec![no_execute(TAINT_NODE_NOT_READY, None)]);
    h.at(10).await;
    h.handle.pod_deleted(PodId::from("default/web")).await.unwrap();

    h.at(600).await;
    assert!(h.evicted.try_recv().is_err());
    assert!(h.handle.timers().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_evicted_pod_reenters_scheduling_queue() {
    let mut h = Harness::with_state(
        ClusterSnapshot::new(vec![node("node1")], vec![web_pod().bound_to("node1")]),
        16,
    );
    let pod_id = PodId::from("default/web");
    assert!(!h.state.queue().contains(&pod_id));

    h.taint(vec![no_execute("key1", None)]);

    let evicted = h.next_eviction().await;
    assert_eq!(evicted.pod.phase, PodPhase::Evicted);
    let requeued = h.state.requeue_evicted(&evicted.pod.id).unwrap();

    assert_eq!(requeued.phase, PodPhase::Pending);
    assert!(h.state.queue().contains(&pod_id));
    assert_eq!(h.state.ledger().requested(&node1()).unwrap().cpu_millicores, 0);

    // the unbind reaches the manager and clears the fired timer
    h.settle().await;
    assert!(h.handle.timers().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_execute_taint_set_through_state_arms_timer() {
    let h = Harness::with_state(
        ClusterSnapshot::new(vec![node("node1")], vec![web_pod().bound_to("node1")]),
        16,
    );
    h.settle().await;

    let delta = h
        .state
        .set_node_taints(&node1(), vec![no_execute(TAINT_NODE_NOT_READY, None)]);
    assert_eq!(delta.added.len(), 1);

    let armed = h.handle.armed().await.unwrap();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].key.pod, PodId::from("default/web"));
    assert_eq!(armed[0].deadline - armed[0].armed_at, Duration::from_secs(300));

    h.state
        .remove_node_taint(&node1(), TAINT_NODE_NOT_READY, TaintEffect::NoExecute);
    assert!(h.handle.armed().await.unwrap().is_empty());
    assert!(h.terminator.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_binding_lag_resyncs_from_state() {
    let pods: Vec<Pod> = (0..5)
        .map(|i| Pod::new(format!("default/web-{}", i), ResourceQuantities::new(100, 1 << 20)))
        .collect();
    let h = Harness::with_state(ClusterSnapshot::new(vec![node("node1")], pods.clone()), 1);
    h.settle().await;

    // bind everything before the manager gets to run: it lags
    for pod in &pods {
        h.state.ledger().force_reserve(&node1(), pod).unwrap();
        h.state.record_binding(&pod.id, &node1()).unwrap();
    }
    h.state.add_node_taint(&node1(), no_execute("key1", Some("v1")));

    let armed = h.handle.armed().await.unwrap();
    assert_eq!(armed.len(), 5);
}
