//! Error types shared by every subsystem.
//!
//! Each concern owns one enum in [`types`]; all of them classify themselves into an
//! [`types::ErrorStatus`] so entry points can report a uniform status.

pub mod types;

pub use types::*;
