//! Training infrastructure: the epoch driver, the collaborator contract it
//! drives, and the per-epoch statistics reporter.

pub mod collaborator;
pub mod driver;
pub mod reporter;

pub use collaborator::{CollaboratorResult, StepSummary, TrainableModel};
pub use driver::{DriverConfig, DriverPhase, EpochDriver, RunSummary};
pub use reporter::{EpochStats, RunReporter};
