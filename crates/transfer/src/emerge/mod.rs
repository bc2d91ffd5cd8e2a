//! The emerge engine: write intents in, one finalized object out.
//!
//! Data flows top-down: intents are validated, the planner partitions
//! them into transport-legal parts, and the executor runs the parts and
//! finalizes (or cancels) the object.

mod executor;
mod part_definition;
mod planner;
mod write_intent;

pub use executor::EmergeExecutor;
pub use part_definition::{
    CopyPartDefinition, EmergePartDefinition, PartId, UploadPartDefinition, UploadSubpart,
    UploadSubpartsDefinition,
};
pub use planner::{EmergePlan, EmergePlanner};
pub use write_intent::{validate_intents, OutboundSource, WriteIntent};
