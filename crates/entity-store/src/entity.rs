use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque concurrency tag assigned by a backend on every successful write.
///
/// A conditional replace succeeds only if the caller presents the token the
/// backend currently holds for the entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wraps a token value previously handed out by a backend.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh token. Backends call this on every mutation.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for VersionToken {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.simple().to_string())
    }
}

/// Identity of an entity within a logical table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub partition_key: String,
    pub row_key: String,
}

impl EntityKey {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.row_key)
    }
}

/// A typed scalar stored in an entity's property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
}

impl PropertyValue {
    /// Returns the name of the value's type, used in codec error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "String",
            PropertyValue::Int(_) => "Int",
            PropertyValue::Double(_) => "Double",
            PropertyValue::Bool(_) => "Bool",
            PropertyValue::DateTime(_) => "DateTime",
            PropertyValue::Guid(_) => "Guid",
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        PropertyValue::DateTime(value)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(value: Uuid) -> Self {
        PropertyValue::Guid(value)
    }
}

/// Named property bag of an entity. Ordered so stored JSON is stable.
pub type Properties = BTreeMap<String, PropertyValue>;

/// The backend-level representation of a record.
///
/// `version` and `timestamp` are assigned by the backend on write; an entity
/// built by the codec for a record that has never been stored carries neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: Properties,
    pub version: Option<VersionToken>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Entity {
    /// Creates a new entity builder.
    pub fn builder() -> EntityBuilder {
        EntityBuilder::default()
    }

    /// Returns the entity's key.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.partition_key.clone(), self.row_key.clone())
    }

    /// Returns a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }
}

/// Builder for constructing entities.
#[derive(Debug, Default)]
pub struct EntityBuilder {
    partition_key: String,
    row_key: String,
    properties: Properties,
    version: Option<VersionToken>,
    timestamp: Option<DateTime<Utc>>,
}

impl EntityBuilder {
    pub fn partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = partition_key.into();
        self
    }

    pub fn row_key(mut self, row_key: impl Into<String>) -> Self {
        self.row_key = row_key.into();
        self
    }

    /// Adds a property, replacing any previous value of the same name.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Replaces the whole property bag.
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn version(mut self, version: VersionToken) -> Self {
        self.version = Some(version);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Entity {
        Entity {
            partition_key: self.partition_key,
            row_key: self.row_key,
            properties: self.properties,
            version: self.version,
            timestamp: self.timestamp,
        }
    }
}
