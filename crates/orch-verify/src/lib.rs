//! The Verification Pipeline (C9): boundary enforcement, command running,
//! environment-freshness, and contract-compatibility checks run against a
//! task's worktree after its worker signals completion.

#![forbid(unsafe_code)]

pub mod boundary;
pub mod checks;
pub mod contract;
pub mod environment;
pub mod error;
pub mod pipeline;

pub use boundary::BoundaryViolation;
pub use checks::{CheckOutcome, PipelineResult};
pub use contract::ContractViolation;
pub use error::VerifyError;
pub use pipeline::{run, VerificationContext, VerificationReport};
