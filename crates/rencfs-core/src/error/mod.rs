//! Error types for the view engine
//!
//! Re-exports the error taxonomy so callers can `use rencfs_core::error::*`
//! without reaching into the module that defines each type.

pub use crate::view::ViewError;
