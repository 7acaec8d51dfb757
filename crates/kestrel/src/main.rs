use clap::{Parser, Subcommand};
use kestrel_admission::{AdmissionConfig, AdmissionController, AdmissionRequest, FailurePolicy};
use kestrel_core::{ClusterSnapshot, StaticStateProvider};
use kestrel_eviction::{EvictedPod, EvictionConfig, EvictionManager};
use kestrel_scheduler::mock::MockTerminator;
use kestrel_scheduler::{BroadcastEventEmitter, EventBusConfig, Scheduler, SchedulerConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "kestrel", about = "Kestrel scheduling constraint engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and eviction manager against a cluster snapshot
    Run {
        /// Path to the JSON cluster snapshot
        #[arg(long, env = "KESTREL_SNAPSHOT")]
        snapshot: String,
        /// Milliseconds between scheduling cycles
        #[arg(long, env = "KESTREL_SCHEDULE_INTERVAL_MS", default_value_t = 1000)]
        schedule_interval_ms: u64,
        /// Pods evaluated concurrently per cycle
        #[arg(long, env = "KESTREL_PARALLELISM", default_value_t = 16)]
        parallelism: usize,
    },
    /// Admit a single JSON admission request and print the response
    Admit {
        /// Path to the JSON admission request
        #[arg(long)]
        request: String,
        /// Fail or Ignore
        #[arg(long, env = "KESTREL_FAILURE_POLICY", default_value = "Fail")]
        failure_policy: FailurePolicy,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            snapshot,
            schedule_interval_ms,
            parallelism,
        } => {
            let config = SchedulerConfig {
                schedule_interval: Duration::from_millis(schedule_interval_ms.max(1)),
                parallelism: parallelism.max(1),
                ..Default::default()
            };
            run(&snapshot, config).await
        }
        Commands::Admit {
            request,
            failure_policy,
        } => admit(&request, failure_policy).await,
    }
}

/// Run the scheduler loop and eviction manager until Ctrl-C
async fn run(snapshot_path: &str, config: SchedulerConfig) -> miette::Result<()> {
    info!("Starting kestrel with snapshot {}", snapshot_path);

    let snapshot = ClusterSnapshot::load(Path::new(snapshot_path))?;
    info!(
        "Loaded snapshot: {} nodes, {} pods ({} pending)",
        snapshot.nodes.len(),
        snapshot.pods.len(),
        snapshot.pending_pods().count()
    );

    let terminator = Arc::new(MockTerminator::new());
    let events = Arc::new(BroadcastEventEmitter::new(EventBusConfig::default()));
    let token = CancellationToken::new();

    let scheduler = Arc::new(Scheduler::new(
        Arc::new(StaticStateProvider::new(snapshot.clone())),
        terminator.clone(),
        events.clone(),
        config,
    ));
    scheduler.refresh().await?;

    // The manager watches the scheduler's state for bindings and taints
    let (manager, handle, evicted) = EvictionManager::new(
        EvictionConfig::default(),
        scheduler.state().clone(),
        terminator,
        events.clone(),
    );

    // 1. Spawn eviction manager
    let eviction_token = token.clone();
    let eviction_task = tokio::spawn(async move {
        if let Err(e) = manager.run(eviction_token).await {
            error!("Eviction manager error: {}", e);
        }
    });

    for node in &snapshot.nodes {
        let taints = handle.node_status(node);
        debug!("Node {} carries {} taint(s)", node.id, taints.len());
    }

    // 2. Spawn forwarder of evicted pods back to the scheduler
    let evicted_task = tokio::spawn(forward_evictions(
        evicted,
        scheduler.clone(),
        token.clone(),
    ));

    // 3. Spawn event log
    let event_task = tokio::spawn(log_events(events.subscribe(), token.clone()));

    // 4. Spawn scheduler
    let scheduler_token = token.clone();
    let scheduler_task = tokio::spawn(async move {
        if let Err(e) = scheduler.run(scheduler_token).await {
            error!("Scheduler error: {}", e);
        }
    });

    info!("All components started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(
            scheduler_task,
            eviction_task,
            evicted_task,
            event_task,
        );
    })
    .await;

    info!("Shutdown complete");

    Ok(())
}

async fn forward_evictions(
    mut evicted: mpsc::Receiver<EvictedPod>,
    scheduler: Arc<Scheduler>,
    token: CancellationToken,
) {
    loop {
        let evicted_pod = tokio::select! {
            _ = token.cancelled() => break,
            pod = evicted.recv() => match pod {
                Some(pod) => pod,
                None => break,
            },
        };
        match scheduler.reinject(&evicted_pod.pod.id) {
            Some(_) => info!(
                "Pod {} evicted from node {} ({}), requeued",
                evicted_pod.pod.id, evicted_pod.node, evicted_pod.taint.key
            ),
            None => debug!("Evicted pod {} is no longer known", evicted_pod.pod.id),
        }
    }
}

async fn log_events(
    mut events: broadcast::Receiver<kestrel_core::SchedulingEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => info!("{:?} {}: {}", event.kind, event.pod, event.message),
                // log only; nothing to recover
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event log lagged, {} events not logged", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Admit one request read from disk
async fn admit(request_path: &str, failure_policy: FailurePolicy) -> miette::Result<()> {
    let data = std::fs::read_to_string(request_path)
        .map_err(|e| miette::miette!("Failed to read request '{}': {}", request_path, e))?;
    let request: AdmissionRequest = kestrel_core::from_json(&data)?;

    let controller = AdmissionController::new(AdmissionConfig {
        failure_policy,
        ..Default::default()
    });
    let response = controller.admit(&request).await;
    println!("{}", kestrel_core::to_json_pretty(&response)?);

    Ok(())
}
