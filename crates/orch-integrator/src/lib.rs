//! The Integrator (C10): deterministic hot-file merging via named region
//! markers, adapter-generated code, and anchor-based marker bootstrapping.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod error;
pub mod integrator;
pub mod regions;
pub mod select;

pub use adapter::{Adapter, AnchorPattern, Fallback, GeneratedCode, GenericAdapter, Position};
pub use error::IntegratorError;
pub use integrator::{apply_intents, implied_resources};
pub use select::select_adapter;
