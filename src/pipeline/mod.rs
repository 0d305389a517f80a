pub mod analyzer;
pub mod coordinator;
pub mod delta;
pub mod ledger;
pub mod refresher;

pub use analyzer::{Anomaly, Decision, NotEvaluableReason, TrialAnalyzer};
pub use coordinator::{PipelineCoordinator, RunOutcome};
pub use delta::{DeltaComputer, DeltaOutcome};
pub use ledger::{LedgerOutcome, TriggerLedger};
pub use refresher::{RefreshBatch, RefreshPolicy, RefreshResult, VideoMetricsRefresher};
