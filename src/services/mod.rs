pub mod assessment_registry;
pub mod connector;
pub mod lifecycle;
pub mod reports;
pub mod roster_registry;

pub use assessment_registry::AssessmentRegistry;
pub use connector::{Connector, CopySummary, IssueOutcome, PullOutcome, WriteOutcome};
pub use lifecycle::{ActionReport, LifecycleController};
pub use roster_registry::{RosterRegistry, StudentImport};
