//! Fiscal device sessions.
//!
//! - [`connparams`]: connection descriptors and the learned-device registry
//! - [`device`]: one session per request, queries and non-fiscal prints
//! - [`transaction`]: receipts, cash documents, shift closing, confirmation
//! - [`result`]: per-operation results and their merge into one JSON answer
//! - [`driver`] / [`emulator`]: the driver seam and its in-memory backend

pub mod config;
pub mod connparams;
pub mod details;
pub mod device;
pub mod driver;
pub mod emulator;
pub mod error;
pub mod layout;
pub mod result;
pub mod transaction;
pub mod types;

pub use config::KkmConfig;
pub use connparams::{ConnParams, KnownConnParams};
pub use device::Device;
pub use error::{KkmError, Result};
pub use result::{merge, merge_all, OperationResult};
