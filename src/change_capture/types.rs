//! Common data types used across the change_capture subsystem.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire representation of an enum value: either its symbolic name or its raw number.
///
/// Raw numbers that do not correspond to a known variant are preserved in an `Unknown`
/// variant instead of failing, so newer peers can send kinds this build does not know yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Name(String),
    Raw(i32),
}

/// Kind of change a mutation applies to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireValue", into = "WireValue")]
pub enum Operation {
    Upsert,
    Delete,
    Unknown(i32),
}

impl Operation {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Operation::Upsert,
            1 => Operation::Delete,
            other => Operation::Unknown(other),
        }
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            Operation::Upsert => 0,
            Operation::Delete => 1,
            Operation::Unknown(raw) => *raw,
        }
    }
}

impl TryFrom<WireValue> for Operation {
    type Error = String;

    fn try_from(value: WireValue) -> Result<Self, Self::Error> {
        match value {
            WireValue::Raw(raw) => Ok(Operation::from_raw(raw)),
            WireValue::Name(name) => match name.to_ascii_uppercase().as_str() {
                "UPSERT" => Ok(Operation::Upsert),
                "DELETE" => Ok(Operation::Delete),
                _ => Err(format!("unknown operation `{}`", name)),
            },
        }
    }
}

impl From<Operation> for WireValue {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Upsert => WireValue::Name("UPSERT".into()),
            Operation::Delete => WireValue::Name("DELETE".into()),
            Operation::Unknown(raw) => WireValue::Raw(raw),
        }
    }
}

/// Part of the data model a mutation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WireValue", into = "WireValue")]
pub enum ClassifierType {
    Catalog,
    Entity,
    Attribute,
    AssociatedData,
    Reference,
    ReferenceAttribute,
    Price,
    Unknown(i32),
}

impl ClassifierType {
    const NAMES: [(&'static str, ClassifierType); 7] = [
        ("CATALOG", ClassifierType::Catalog),
        ("ENTITY", ClassifierType::Entity),
        ("ATTRIBUTE", ClassifierType::Attribute),
        ("ASSOCIATED_DATA", ClassifierType::AssociatedData),
        ("REFERENCE", ClassifierType::Reference),
        ("REFERENCE_ATTRIBUTE", ClassifierType::ReferenceAttribute),
        ("PRICE", ClassifierType::Price),
    ];

    pub fn from_raw(raw: i32) -> Self {
        usize::try_from(raw)
            .ok()
            .and_then(|i| Self::NAMES.get(i))
            .map(|(_, c)| *c)
            .unwrap_or(ClassifierType::Unknown(raw))
    }

    pub fn as_raw(&self) -> i32 {
        match self {
            ClassifierType::Unknown(raw) => *raw,
            known => Self::NAMES
                .iter()
                .position(|(_, c)| c == known)
                .map(|i| i as i32)
                .unwrap_or(-1),
        }
    }
}

impl TryFrom<WireValue> for ClassifierType {
    type Error = String;

    fn try_from(value: WireValue) -> Result<Self, Self::Error> {
        match value {
            WireValue::Raw(raw) => Ok(ClassifierType::from_raw(raw)),
            WireValue::Name(name) => {
                let upper = name.to_ascii_uppercase();
                Self::NAMES
                    .iter()
                    .find(|(n, _)| *n == upper)
                    .map(|(_, c)| *c)
                    .ok_or_else(|| format!("unknown classifier type `{}`", name))
            }
        }
    }
}

impl From<ClassifierType> for WireValue {
    fn from(c: ClassifierType) -> Self {
        match c {
            ClassifierType::Unknown(raw) => WireValue::Raw(raw),
            known => ClassifierType::NAMES
                .iter()
                .find(|(_, k)| *k == known)
                .map(|(n, _)| WireValue::Name((*n).to_string()))
                .unwrap_or(WireValue::Raw(known.as_raw())),
        }
    }
}

/// How much of each mutation a subscriber wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureContent {
    /// Descriptor only (target, classifier, operation).
    #[default]
    Header,
    /// Descriptor plus the mutation payload.
    Body,
}

/// An atomic change applied within a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target entity collection; `None` for catalog-level mutations.
    pub entity_type: Option<String>,
    pub primary_key: Option<i64>,
    pub classifier: ClassifierType,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Mutation {
    pub fn upsert_entity(entity_type: &str, primary_key: i64, body: serde_json::Value) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            primary_key: Some(primary_key),
            classifier: ClassifierType::Entity,
            operation: Operation::Upsert,
            body: Some(body),
        }
    }

    pub fn delete_entity(entity_type: &str, primary_key: i64) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            primary_key: Some(primary_key),
            classifier: ClassifierType::Entity,
            operation: Operation::Delete,
            body: None,
        }
    }
}

/// One mutation delivered to one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeCaptureEvent {
    pub subscription_id: Uuid,
    pub catalog: String,
    /// Commit sequence number (catalog version) of the owning transaction.
    pub sequence: u64,
    /// Position of the mutation within its transaction.
    pub index: u32,
    pub entity_type: Option<String>,
    pub primary_key: Option<i64>,
    pub classifier: ClassifierType,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Why a subscription stopped delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionEnd {
    Unsubscribed,
    SessionTerminated,
    CatalogRemoved,
    Evicted,
}

/// Snapshot of a live subscription, used for statistics and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub session_id: Uuid,
    pub catalog: String,
    pub since_sequence: u64,
    pub last_delivered_sequence: Option<u64>,
}
