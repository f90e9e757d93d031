//! Catalog registry.
//!
//! The storage engine that owns real catalogs lives outside of this crate. This module keeps the
//! minimal catalog bookkeeping the session and transaction layers authorise against: names,
//! warm-up/alive state, the commit lock and the committed version.

pub mod catalog_registry;
pub mod types;

pub use catalog_registry::{CatalogRegistry, RESERVED_KEYWORDS};
pub use types::{CatalogEntry, CatalogState};
