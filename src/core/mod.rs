//! Pipeline engine: routing, execution, reconciliation, aggregation.

pub mod aggregate;
pub mod batch;
pub mod controller;
pub mod journal;
pub mod normalize;
pub mod ondemand;
pub mod reconcile;
pub mod retry;
pub mod router;

pub use aggregate::Aggregator;
pub use batch::{shard, BatchJobManager, BatchSubmission, ShardPlan};
pub use controller::{PipelineController, RunLock};
pub use journal::{Journal, RunEvent};
pub use normalize::{CollectResult, Normalizer};
pub use ondemand::OnDemandExecutor;
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use retry::RetryPolicy;
pub use router::{decide, Dispatch};
