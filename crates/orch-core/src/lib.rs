//! Planning and scheduling primitives shared by every orchestrator crate:
//! the plan model and validator, dependency graph engine, conflict
//! analyzer, risk scorer, and configuration schema.
//!
//! Nothing in this crate touches the filesystem beyond [`config::OrchestrationConfig::load`]
//! or shells out to a subprocess — those concerns live in `orch-state`,
//! `orch-git`, and `orch-session`.

#![forbid(unsafe_code)]

pub mod conflict;
pub mod config;
pub mod dag;
pub mod ids;
pub mod plan;
pub mod risk;

pub use conflict::{all_resolved, analyze, Conflict, ConflictKind};
pub use config::{ConfigError, OrchestrationConfig};
pub use dag::DagError;
pub use ids::{TaskId, TaskIdError};
pub use plan::{Check, CheckType, Plan, PlanError, PlanFormat, Task, ValidationError, Warning};
pub use risk::{score as score_risk, RiskAssessment, RiskConfig};
