// Edit operations, the checkpoint scheduler and the idle checkpoint loop.

pub mod idle;
pub mod ops;
pub mod scheduler;

pub use idle::{IdleCheckpointHandle, IdleCheckpointLoop};
pub use ops::{EditOperation, SpanAnchor};
pub use scheduler::{
    should_run_full_scan_now, CheckpointOutcome, CheckpointResult, CheckpointScheduler,
    CheckpointState, FullScanInputs, SchedulerStats,
};
