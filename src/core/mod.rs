//! Core types and error handling for provisor
//!
//! - [`error`] - crate-wide error type and user-friendly error reporting

pub mod error;

pub use error::{ErrorContext, ProvisorError, user_friendly_error};
