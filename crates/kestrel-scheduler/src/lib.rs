//! Kestrel Scheduler - Pod to Node scheduling
//!
//! This crate provides:
//! - Taint/toleration and node-affinity matching
//! - Filter predicates and weighted scoring plugins
//! - A priority queue with exponential backoff
//! - Atomic per-node resource reservation
//! - Priority preemption honoring disruption budgets

pub mod affinity;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod ledger;
pub mod mock;
pub mod preemption;
pub mod queue;
pub mod scheduler;
pub mod score;
pub mod state;
pub mod taint_index;
pub mod toleration;
pub mod types;

// Re-export commonly used types
pub use config::{
    BackoffConfig, FilterPlugin, PluginConfig, PreemptionConfig, SchedulerConfig, ScorePlugin,
};
pub use error::{Result, SchedulerError};
pub use events::{BroadcastEventEmitter, EventBusConfig};
pub use filter::{FilterOutcome, FilterPipeline, FilterPredicate};
pub use ledger::ResourceLedger;
pub use preemption::{find_candidate, Candidate, PreemptionController, VictimExit};
pub use queue::SchedulingQueue;
pub use scheduler::{ScheduleOutcome, Scheduler};
pub use score::{NodeScore, ScoreFunction, ScoringPipeline};
pub use state::{BindingEvent, ClusterState, SharedState};
pub use taint_index::{TaintDelta, TaintIndex};
pub use toleration::{no_execute_tolerance, tolerates, try_tolerates, Tolerance};
pub use types::{FilterCode, FilterResult, NodeInfo, SchedulingContext, ScoreResult};
