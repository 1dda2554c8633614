//! Error type for the integrator.

use thiserror::Error;

/// Errors raised while integrating patch intents into a hot file.
#[derive(Debug, Error)]
pub enum IntegratorError {
    /// A region's markers were needed but not present and could not be
    /// bootstrapped.
    #[error("region `{0}` markers not found and no anchor could locate an insertion point")]
    RegionNotFound(String),
    /// An anchor regex had `fallback: serialize` or `fallback: error` and
    /// did not match.
    #[error("anchor pattern not found for region `{region}` ({anchor_regex}); hot file requires serialization")]
    AnchorNotFound {
        /// The region whose anchor failed to match.
        region: String,
        /// The anchor regex that was searched for.
        anchor_regex: String,
    },
    /// An intent named an action the selected adapter doesn't support.
    #[error("adapter `{adapter}` does not support action `{action}`")]
    UnsupportedAction {
        /// The adapter's name.
        adapter: String,
        /// The unsupported action.
        action: String,
    },
    /// A required intent parameter was missing or the wrong type.
    #[error("intent for action `{action}` is missing or has an invalid `{field}` parameter")]
    InvalidIntentParameter {
        /// The action being generated.
        action: String,
        /// The offending parameter name.
        field: String,
    },
    /// Reading or writing the hot file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was attempted against.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
