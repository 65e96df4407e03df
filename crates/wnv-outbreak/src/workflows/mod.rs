pub mod analysis;
pub mod etl;
pub mod prompt;
pub mod publish;
pub mod run;

pub use run::{EtlStage, OutbreakRun, RunError, RunOptions, RunServices, RunSummary};
