use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, info};
use regex::Regex;

use super::types::{CatalogEntry, CatalogState};
use crate::error_handling::types::CatalogError;

/// Names that cannot be used for catalogs because the query language claims them.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "system",
    "catalog",
    "entity",
    "schema",
    "session",
    "transaction",
    "attribute",
    "reference",
    "price",
    "hierarchy",
];

/// In-memory registry of catalogs known to this instance.
///
/// The registry is the single authority on catalog names and states. Sessions and transactions
/// hold `Arc<CatalogEntry>` handles, so a rename moves the key without invalidating them.
pub struct CatalogRegistry {
    catalogs: RwLock<HashMap<String, Arc<CatalogEntry>>>,
    name_pattern: Regex,
}

impl Default for CatalogRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self {
            catalogs: RwLock::new(HashMap::new()),
            name_pattern: Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,254}$")
                .unwrap_or_else(|e| panic!("static catalog name pattern is invalid: {}", e)),
        }
    }

    fn validate_name(&self, name: &str) -> Result<(), CatalogError> {
        if !self.name_pattern.is_match(name) {
            return Err(CatalogError::InvalidCatalogName(name.to_string()));
        }
        if RESERVED_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(name))
        {
            return Err(CatalogError::ReservedKeyword(name.to_string()));
        }
        Ok(())
    }

    /// Creates a new catalog in the `WarmingUp` state.
    pub fn define(&self, name: &str) -> Result<Arc<CatalogEntry>, CatalogError> {
        self.validate_name(name)?;
        let mut catalogs = self.catalogs.write().unwrap_or_else(|e| e.into_inner());
        if catalogs.contains_key(name) {
            return Err(CatalogError::CatalogAlreadyExists(name.to_string()));
        }
        let entry = Arc::new(CatalogEntry::new(name.to_string()));
        catalogs.insert(name.to_string(), Arc::clone(&entry));
        info!("Catalog `{}` defined", name);
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<CatalogEntry>, CatalogError> {
        self.catalogs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::CatalogNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .catalogs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.catalogs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, name: &str) -> Result<CatalogState, CatalogError> {
        Ok(self.get(name)?.state())
    }

    /// Removes a catalog. Returns `true` if it existed.
    pub fn delete_if_exists(&self, name: &str) -> bool {
        let removed = self
            .catalogs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some();
        if removed {
            info!("Catalog `{}` deleted", name);
        } else {
            debug!("Catalog `{}` did not exist, nothing deleted", name);
        }
        removed
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<(), CatalogError> {
        self.validate_name(to)?;
        let mut catalogs = self.catalogs.write().unwrap_or_else(|e| e.into_inner());
        if catalogs.contains_key(to) {
            return Err(CatalogError::CatalogAlreadyExists(to.to_string()));
        }
        let entry = catalogs
            .remove(from)
            .ok_or_else(|| CatalogError::CatalogNotFound(from.to_string()))?;
        entry.set_name(to.to_string());
        catalogs.insert(to.to_string(), entry);
        info!("Catalog `{}` renamed to `{}`", from, to);
        Ok(())
    }

    /// Makes `replaced_by` available under the name `to_be_replaced`, dropping whatever catalog
    /// carried that name before.
    pub fn replace(&self, to_be_replaced: &str, replaced_by: &str) -> Result<(), CatalogError> {
        self.validate_name(to_be_replaced)?;
        let mut catalogs = self.catalogs.write().unwrap_or_else(|e| e.into_inner());
        let entry = catalogs
            .remove(replaced_by)
            .ok_or_else(|| CatalogError::CatalogNotFound(replaced_by.to_string()))?;
        entry.set_name(to_be_replaced.to_string());
        let previous = catalogs.insert(to_be_replaced.to_string(), entry);
        info!(
            "Catalog `{}` replaced by `{}` (previous catalog existed: {})",
            to_be_replaced,
            replaced_by,
            previous.is_some()
        );
        Ok(())
    }

    /// Transitions a catalog from warm-up to alive.
    pub fn go_live(&self, name: &str) -> Result<(), CatalogError> {
        let entry = self.get(name)?;
        if entry.go_live() {
            info!("Catalog `{}` is now alive", name);
            Ok(())
        } else {
            Err(CatalogError::CatalogAlreadyAlive(name.to_string()))
        }
    }
}
