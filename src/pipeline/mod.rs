// Batch pipeline: intake of raw address text and the geocoding loop

pub mod intake;
pub mod orchestrator;

pub use intake::Intake;
pub use orchestrator::BatchOrchestrator;
