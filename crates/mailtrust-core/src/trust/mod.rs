//! Domain trust lifecycle: registration, verification and scheduled sweeps

pub mod machine;
pub mod scheduler;

pub use machine::{
    next_status, DomainCheckOutcome, ExpectedRecords, TrustStateMachine, TxtRecord,
};
pub use scheduler::{SweepKind, SweepSummary, TrustScheduler};
