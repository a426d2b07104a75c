//! Handles to objects that live inside the script engine.

use serde::de::{DeserializeOwned, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use ferry_types::RemoteObjectId;

use crate::dispatcher::{CallFuture, CallOptions, Dispatcher};
use crate::reference_codec::{REMOTE_OBJECT_MARKER, SentinelVisitor};

/// Engine function that drops the engine's entry for a remote object.
pub const RELEASE_REMOTE_OBJECT: &str = "__releaseRemoteObject";

/// An engine-side object, received as `{"__remoteObject": <id>}`.
///
/// Passing it back as an argument sends the same record, so the engine sees
/// its own object again.
#[derive(Debug, PartialEq, Eq)]
pub struct RemoteObject {
    id: RemoteObjectId,
}

impl RemoteObject {
    #[must_use]
    pub fn id(&self) -> RemoteObjectId {
        self.id
    }

    /// Call `identifier` on this object.
    pub fn invoke<T, A>(
        &self,
        dispatcher: &Dispatcher,
        identifier: &str,
        args: &A,
        options: CallOptions,
    ) -> CallFuture<T>
    where
        T: DeserializeOwned + Send + 'static,
        A: Serialize + ?Sized,
    {
        dispatcher.invoke_on(self.id, identifier, args, options)
    }

    /// Ask the engine to drop the object. The handle is consumed.
    pub fn release(self, dispatcher: &Dispatcher) -> CallFuture<()> {
        dispatcher.invoke(RELEASE_REMOTE_OBJECT, &(self.id,), CallOptions::new())
    }
}

impl Serialize for RemoteObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(REMOTE_OBJECT_MARKER, &self.id)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for RemoteObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = deserializer.deserialize_map(SentinelVisitor::<RemoteObjectId>::new(
            REMOTE_OBJECT_MARKER,
        ))?;
        Ok(Self { id })
    }
}
