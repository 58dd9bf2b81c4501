//! Core types and traits for the classification pipeline

pub mod error;
pub mod fingerprint;
pub mod traits;
pub mod types;

pub use self::error::*;
pub use self::fingerprint::*;
pub use self::traits::*;
pub use self::types::*;
