//! Probe registration error types

use thiserror::Error;

/// Errors that can occur while registering or removing a probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The symbol is not resolvable on this build
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// A probe of the same kind already occupies this call site
    #[error("Call site busy: {symbol} already has a {kind} probe")]
    Busy { symbol: String, kind: &'static str },

    /// Handle does not refer to a live registration
    #[error("Probe not registered: {0}")]
    NotRegistered(String),
}
