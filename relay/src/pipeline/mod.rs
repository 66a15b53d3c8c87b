//! Staged per-endpoint delivery.

mod delivery;

pub use delivery::{DeliveryOutcome, DeliveryPipeline, DeliveryRejection, PipelineError};
