//! Controller core module.
//!
//! Builds every registry from the configuration and serves the remote procedures on top of
//! them.

pub mod controller_handler;
pub mod types;

#[cfg(test)]
mod tests;

pub use controller_handler::Controller;
pub use types::{CatalogStatistics, ServerStatus, SweepReport};
