// Per-document sessions and the registry that owns them.

pub mod metrics;
pub mod registry;
pub mod session;

pub use metrics::{LargeDocPerformanceMetrics, ScanTimings};
pub use registry::SessionRegistry;
pub use session::{DocumentSession, SharedSession};
