//! Mapping between typed records and [`Entity`] property bags.
//!
//! A record type implements [`TableEntity`]; [`encode`] and [`decode`] are
//! the only way records cross into and out of a backend. Decoding is lenient:
//! a property that is missing decodes to the type's default so records written
//! by older code still load. A property that is present with the wrong type is
//! an error.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::entity::{Entity, EntityKey, Properties, PropertyValue, VersionToken};

/// Errors raised while encoding or decoding records.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// A partition or row key was empty.
    #[error("{kind}: {which} must not be empty")]
    EmptyKey {
        kind: &'static str,
        which: &'static str,
    },

    /// A required field had no value at encode time.
    #[error("{kind}: required field '{field}' is missing")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    /// A stored property did not have the expected type.
    #[error("Property '{field}' has type {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A stored property had the right type but an unusable value.
    #[error("Property '{field}' is invalid: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A record that can be stored as a keyed entity.
pub trait TableEntity: Sized + Send + Sync {
    /// Logical entity kind, used to derive the physical table name.
    const KIND: &'static str;

    fn partition_key(&self) -> String;

    fn row_key(&self) -> String;

    /// The version token from the last load or write, if any.
    fn version(&self) -> Option<&VersionToken>;

    fn set_version(&mut self, version: Option<VersionToken>);

    /// Writes every non-key field into the property bag.
    fn write_properties(&self, props: &mut PropertyWriter) -> Result<(), CodecError>;

    /// Rebuilds the record from its key and property bag.
    fn read_properties(key: &EntityKey, props: &PropertyReader<'_>) -> Result<Self, CodecError>;
}

/// Encodes a record into an entity carrying the record's version token.
pub fn encode<T: TableEntity>(record: &T) -> Result<Entity, CodecError> {
    let partition_key = record.partition_key();
    if partition_key.is_empty() {
        return Err(CodecError::EmptyKey {
            kind: T::KIND,
            which: "partition key",
        });
    }
    let row_key = record.row_key();
    if row_key.is_empty() {
        return Err(CodecError::EmptyKey {
            kind: T::KIND,
            which: "row key",
        });
    }

    let mut writer = PropertyWriter::new(T::KIND);
    record.write_properties(&mut writer)?;

    Ok(Entity {
        partition_key,
        row_key,
        properties: writer.finish(),
        version: record.version().cloned(),
        timestamp: None,
    })
}

/// Decodes an entity into a record, carrying over its version token.
pub fn decode<T: TableEntity>(entity: Entity) -> Result<T, CodecError> {
    let key = entity.key();
    let reader = PropertyReader::new(&entity.properties);
    let mut record = T::read_properties(&key, &reader)?;
    record.set_version(entity.version);
    Ok(record)
}

/// Collects a record's properties during [`encode`].
#[derive(Debug)]
pub struct PropertyWriter {
    kind: &'static str,
    properties: Properties,
}

impl PropertyWriter {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            properties: Properties::new(),
        }
    }

    /// Writes a property.
    pub fn put(&mut self, name: &str, value: impl Into<PropertyValue>) -> &mut Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Writes a property if present; `None` leaves the property out.
    pub fn put_opt<V: Into<PropertyValue>>(&mut self, name: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.put(name, value);
        }
        self
    }

    /// Writes a string that must not be empty.
    pub fn put_required(
        &mut self,
        name: &'static str,
        value: &str,
    ) -> Result<&mut Self, CodecError> {
        if value.trim().is_empty() {
            return Err(CodecError::MissingField {
                kind: self.kind,
                field: name,
            });
        }
        Ok(self.put(name, value))
    }

    fn finish(self) -> Properties {
        self.properties
    }
}

/// Typed, default-tolerant access to a property bag during [`decode`].
#[derive(Debug)]
pub struct PropertyReader<'a> {
    properties: &'a Properties,
}

impl<'a> PropertyReader<'a> {
    pub fn new(properties: &'a Properties) -> Self {
        Self { properties }
    }

    fn mismatch(name: &str, expected: &'static str, found: &PropertyValue) -> CodecError {
        CodecError::TypeMismatch {
            field: name.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    pub fn opt_string(&self, name: &str) -> Result<Option<String>, CodecError> {
        match self.properties.get(name) {
            None => Ok(None),
            Some(PropertyValue::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(Self::mismatch(name, "String", other)),
        }
    }

    /// Reads a string, defaulting to empty.
    pub fn string(&self, name: &str) -> Result<String, CodecError> {
        Ok(self.opt_string(name)?.unwrap_or_default())
    }

    /// Reads an integer, defaulting to zero.
    pub fn i64(&self, name: &str) -> Result<i64, CodecError> {
        match self.properties.get(name) {
            None => Ok(0),
            Some(PropertyValue::Int(v)) => Ok(*v),
            Some(other) => Err(Self::mismatch(name, "Int", other)),
        }
    }

    /// Reads a non-negative integer that fits in `u32`, defaulting to zero.
    pub fn u32(&self, name: &str) -> Result<u32, CodecError> {
        let raw = self.i64(name)?;
        u32::try_from(raw).map_err(|_| CodecError::InvalidValue {
            field: name.to_string(),
            reason: format!("{raw} is out of range for an unsigned count"),
        })
    }

    /// Reads a floating point number, defaulting to zero. Integers widen.
    pub fn f64(&self, name: &str) -> Result<f64, CodecError> {
        match self.properties.get(name) {
            None => Ok(0.0),
            Some(PropertyValue::Double(v)) => Ok(*v),
            Some(PropertyValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(Self::mismatch(name, "Double", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool, CodecError> {
        match self.properties.get(name) {
            None => Ok(false),
            Some(PropertyValue::Bool(v)) => Ok(*v),
            Some(other) => Err(Self::mismatch(name, "Bool", other)),
        }
    }

    /// Reads a timestamp, defaulting to the Unix epoch.
    pub fn datetime(&self, name: &str) -> Result<DateTime<Utc>, CodecError> {
        match self.properties.get(name) {
            None => Ok(DateTime::<Utc>::default()),
            Some(PropertyValue::DateTime(v)) => Ok(*v),
            Some(other) => Err(Self::mismatch(name, "DateTime", other)),
        }
    }

    /// Reads a GUID, defaulting to the nil UUID. Strings are parsed.
    pub fn guid(&self, name: &str) -> Result<Uuid, CodecError> {
        match self.properties.get(name) {
            None => Ok(Uuid::nil()),
            Some(PropertyValue::Guid(v)) => Ok(*v),
            Some(PropertyValue::String(s)) => {
                Uuid::parse_str(s).map_err(|e| CodecError::InvalidValue {
                    field: name.to_string(),
                    reason: e.to_string(),
                })
            }
            Some(other) => Err(Self::mismatch(name, "Guid", other)),
        }
    }
}

/// Parses a key component written by the codec back into a UUID.
pub fn parse_key_uuid(field: &str, value: &str) -> Result<Uuid, CodecError> {
    Uuid::parse_str(value).map_err(|e| CodecError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        folder: String,
        id: String,
        title: String,
        body: Option<String>,
        pinned: bool,
        views: u32,
        version: Option<VersionToken>,
    }

    impl TableEntity for Note {
        const KIND: &'static str = "Note";

        fn partition_key(&self) -> String {
            self.folder.clone()
        }

        fn row_key(&self) -> String {
            self.id.clone()
        }

        fn version(&self) -> Option<&VersionToken> {
            self.version.as_ref()
        }

        fn set_version(&mut self, version: Option<VersionToken>) {
            self.version = version;
        }

        fn write_properties(&self, props: &mut PropertyWriter) -> Result<(), CodecError> {
            props.put_required("Title", &self.title)?;
            props
                .put_opt("Body", self.body.clone())
                .put("Pinned", self.pinned)
                .put("Views", self.views);
            Ok(())
        }

        fn read_properties(
            key: &EntityKey,
            props: &PropertyReader<'_>,
        ) -> Result<Self, CodecError> {
            Ok(Self {
                folder: key.partition_key.clone(),
                id: key.row_key.clone(),
                title: props.string("Title")?,
                body: props.opt_string("Body")?,
                pinned: props.bool("Pinned")?,
                views: props.u32("Views")?,
                version: None,
            })
        }
    }

    fn note() -> Note {
        Note {
            folder: "inbox".to_string(),
            id: "n-1".to_string(),
            title: "Groceries".to_string(),
            body: Some("milk".to_string()),
            pinned: true,
            views: 4,
            version: Some(VersionToken::new("v1")),
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let original = note();
        let entity = encode(&original).unwrap();
        assert_eq!(entity.partition_key, "inbox");
        assert_eq!(entity.row_key, "n-1");
        assert_eq!(entity.version, Some(VersionToken::new("v1")));

        let decoded: Note = decode(entity).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn none_fields_are_omitted_and_decode_back_to_none() {
        let mut original = note();
        original.body = None;
        let entity = encode(&original).unwrap();
        assert!(entity.property("Body").is_none());

        let decoded: Note = decode(entity).unwrap();
        assert_eq!(decoded.body, None);
    }

    #[test]
    fn missing_properties_decode_to_defaults() {
        let entity = Entity::builder()
            .partition_key("inbox")
            .row_key("n-2")
            .property("Unrelated", 1i64)
            .build();

        let decoded: Note = decode(entity).unwrap();
        assert_eq!(decoded.title, "");
        assert!(!decoded.pinned);
        assert_eq!(decoded.views, 0);
        assert_eq!(decoded.version, None);
    }

    #[test]
    fn empty_required_field_fails_encode() {
        let mut original = note();
        original.title = "  ".to_string();
        assert_eq!(
            encode(&original),
            Err(CodecError::MissingField {
                kind: "Note",
                field: "Title"
            })
        );
    }

    #[test]
    fn empty_key_fails_encode() {
        let mut original = note();
        original.id.clear();
        assert!(matches!(
            encode(&original),
            Err(CodecError::EmptyKey { which: "row key", .. })
        ));
    }

    #[test]
    fn wrong_type_fails_decode() {
        let entity = Entity::builder()
            .partition_key("inbox")
            .row_key("n-3")
            .property("Pinned", "yes")
            .build();

        let result: Result<Note, _> = decode(entity);
        assert!(matches!(result, Err(CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn negative_count_fails_decode() {
        let entity = Entity::builder()
            .partition_key("inbox")
            .row_key("n-4")
            .property("Views", -1i64)
            .build();

        let result: Result<Note, _> = decode(entity);
        assert!(matches!(result, Err(CodecError::InvalidValue { .. })));
    }

    #[test]
    fn guid_reader_accepts_strings() {
        let id = Uuid::new_v4();
        let mut props = Properties::new();
        props.insert("Id".to_string(), PropertyValue::String(id.to_string()));
        let reader = PropertyReader::new(&props);
        assert_eq!(reader.guid("Id").unwrap(), id);
        assert_eq!(reader.guid("Missing").unwrap(), Uuid::nil());
    }
}
