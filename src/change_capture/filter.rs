//! Data-site filter of a change capture subscription.
//!
//! A filter is a conjunction over four dimensions. An absent entity type or primary key and an
//! empty classifier or operation set each mean "match all" for that dimension.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::{CaptureContent, ClassifierType, Mutation, Operation};
use crate::error_handling::types::CaptureError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeCaptureFilter {
    pub entity_type: Option<String>,
    pub primary_key: Option<i64>,
    pub classifiers: HashSet<ClassifierType>,
    pub operations: HashSet<Operation>,
    pub content: CaptureContent,
}

impl ChangeCaptureFilter {
    /// Rejects filters that cannot match anything meaningful.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if let Some(ref t) = self.entity_type {
            if t.trim().is_empty() {
                return Err(CaptureError::InvalidFilter(
                    "entity type must not be blank".into(),
                ));
            }
        }
        if self.primary_key.is_some() && self.entity_type.is_none() {
            return Err(CaptureError::InvalidFilter(
                "primary key requires an entity type".into(),
            ));
        }
        Ok(())
    }

    pub fn matches(&self, mutation: &Mutation) -> bool {
        if let Some(ref t) = self.entity_type {
            if mutation.entity_type.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(pk) = self.primary_key {
            if mutation.primary_key != Some(pk) {
                return false;
            }
        }
        if !self.classifiers.is_empty() && !self.classifiers.contains(&mutation.classifier) {
            return false;
        }
        if !self.operations.is_empty() && !self.operations.contains(&mutation.operation) {
            return false;
        }
        true
    }

    /// Builds a filter on one entity type limited to the given operations.
    pub fn for_entity_type<I: IntoIterator<Item = Operation>>(entity_type: &str, operations: I) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            operations: operations.into_iter().collect(),
            ..Default::default()
        }
    }
}
