//! Sentinel encoding for object references crossing the boundary.
//!
//! A [`TrackedRef`] never serializes its object. Wherever serde meets one,
//! at any depth of the argument structure, it writes a single-field record
//! `{"__hostObject": <id>}` carrying the id assigned when the wrapper was
//! created. Only `TrackedRef` routes through here; everything else is plain
//! serde.
//!
//! Outbound arguments are encoded inside [`encode_for`], which names the
//! dispatcher's table. A wrapper from any other table fails to serialize, so
//! its id can never be resolved against the wrong objects.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{self, SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use ferry_types::ObjectId;

use crate::error::ObjectTableError;
use crate::object_table::{ObjectTable, TrackedRef};

/// Reserved field naming a host object tracked for the script engine.
pub const HOST_OBJECT_MARKER: &str = "__hostObject";

/// Reserved field naming an object that lives inside the script engine.
pub const REMOTE_OBJECT_MARKER: &str = "__remoteObject";

thread_local! {
    static ENCODING_TABLE: RefCell<Option<ObjectTable>> = const { RefCell::new(None) };
}

/// Run `encode` with `table` as the only table whose wrappers may be written.
pub(crate) fn encode_for<R>(table: &ObjectTable, encode: impl FnOnce() -> R) -> R {
    let _scope = EncodingScope(ENCODING_TABLE.replace(Some(table.clone())));
    encode()
}

/// Restores the enclosing table, also when `encode` unwinds.
struct EncodingScope(Option<ObjectTable>);

impl Drop for EncodingScope {
    fn drop(&mut self) {
        ENCODING_TABLE.set(self.0.take());
    }
}

impl<T> Serialize for TrackedRef<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let foreign = ENCODING_TABLE
            .with_borrow(|active| active.as_ref().is_some_and(|table| !table.owns(self)));
        if foreign {
            return Err(ser::Error::custom(ObjectTableError::ForeignReference(
                self.id(),
            )));
        }
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(HOST_OBJECT_MARKER, &self.id())?;
        map.end()
    }
}

/// The sentinel record for `id`, as a JSON value.
#[must_use]
pub fn encode_sentinel(id: ObjectId) -> serde_json::Value {
    let mut record = serde_json::Map::with_capacity(1);
    record.insert(HOST_OBJECT_MARKER.to_owned(), id.value().into());
    serde_json::Value::Object(record)
}

/// Recognise a host-object sentinel in an already parsed value.
///
/// Only an object with exactly the marker field and an unsigned id matches.
#[must_use]
pub fn decode_sentinel(value: &serde_json::Value) -> Option<ObjectId> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get(HOST_OBJECT_MARKER)?.as_u64().map(ObjectId::new)
}

/// A host-object reference sent back by the script engine.
///
/// Decoding yields only the id; the object is looked up later, against the
/// table the caller names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRefToken(ObjectId);

impl ObjectRefToken {
    #[must_use]
    pub fn id(self) -> ObjectId {
        self.0
    }

    pub fn resolve(self, table: &ObjectTable) -> Result<Arc<dyn Any + Send + Sync>, ObjectTableError> {
        table.find(self.0)
    }

    pub fn resolve_as<T: Send + Sync + 'static>(
        self,
        table: &ObjectTable,
    ) -> Result<Arc<T>, ObjectTableError> {
        table.find_as(self.0)
    }
}

impl Serialize for ObjectRefToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(HOST_OBJECT_MARKER, &self.0)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ObjectRefToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_map(SentinelVisitor::<ObjectId>::new(HOST_OBJECT_MARKER))
            .map(Self)
    }
}

/// Reads a single-field `{ <marker>: <id> }` record.
pub(crate) struct SentinelVisitor<I> {
    marker: &'static str,
    _id: PhantomData<I>,
}

impl<I> SentinelVisitor<I> {
    pub(crate) fn new(marker: &'static str) -> Self {
        Self {
            marker,
            _id: PhantomData,
        }
    }
}

impl<'de, I: Deserialize<'de>> Visitor<'de> for SentinelVisitor<I> {
    type Value = I;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an object with a single `{}` field", self.marker)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut id = None;
        while let Some(key) = map.next_key::<String>()? {
            if key != self.marker {
                return Err(de::Error::unknown_field(&key, &[]));
            }
            if id.is_some() {
                return Err(de::Error::duplicate_field(self.marker));
            }
            id = Some(map.next_value()?);
        }
        id.ok_or_else(|| de::Error::missing_field(self.marker))
    }
}
