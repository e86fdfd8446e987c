//! Error taxonomy for device sessions.
//!
//! Everything that aborts a request before a receipt is opened surfaces as a
//! `KkmError`. Once a receipt is open, failures are recorded in an
//! [`OperationResult`](super::result::OperationResult) instead, so the caller can
//! still report and compensate the already-mutated fiscal state.

use thiserror::Error;

/// Fixed message reported when the confirmation protocol gives up.
pub const CHECKING_ERROR: &str = "Could not check document closing";

#[derive(Debug, Error)]
pub enum KkmError {
    /// Input rejected before any driver interaction.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid connection parameters")]
    InvalidConnParams,

    #[error("Not implemented")]
    NotImplemented,

    #[error("Not available")]
    NotAvailable,

    #[error("Device exchange error")]
    Exchange,

    #[error("Connection error (expected SN: {expected}, actual SN: {actual})")]
    SerialMismatch { expected: String, actual: String },

    #[error("No receipt items provided")]
    RequiresItems,

    /// Fault reported by the driver, captured from its error description.
    #[error("{0}")]
    Driver(String),

    #[error("Registry: {0}")]
    Registry(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl KkmError {
    /// "Required valid property 'name'"
    pub fn requires_property(name: &str) -> Self {
        KkmError::Validation(format!("Required valid property '{name}'"))
    }

    /// "Required valid property 'parent.name'"
    pub fn requires_property2(parent: &str, name: &str) -> Self {
        KkmError::Validation(format!("Required valid property '{parent}.{name}'"))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, KkmError::Validation(_) | KkmError::RequiresItems)
    }
}

pub type Result<T> = std::result::Result<T, KkmError>;
