//! Core domain types for Ferry.
//!
//! Identifiers and invocation descriptors shared by the interop core and the
//! binary. No IO, no async.

mod ids;

pub use ids::{CallHandle, ObjectId, RemoteObjectId};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Inbound invocation descriptors
// ============================================================================

/// The host method a script-engine call was aimed at.
///
/// Static calls name an assembly; instance calls name the tracked object and
/// leave the assembly empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assembly: Option<String>,
    method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_id: Option<ObjectId>,
}

impl InvocationTarget {
    #[must_use]
    pub fn static_method(assembly: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            assembly: Some(assembly.into()),
            method: method.into(),
            object_id: None,
        }
    }

    #[must_use]
    pub fn instance_method(object_id: ObjectId, method: impl Into<String>) -> Self {
        Self {
            assembly: None,
            method: method.into(),
            object_id: Some(object_id),
        }
    }

    #[must_use]
    pub fn new(assembly: Option<String>, method: String, object_id: Option<ObjectId>) -> Self {
        Self {
            assembly,
            method,
            object_id,
        }
    }

    #[must_use]
    pub fn assembly(&self) -> Option<&str> {
        self.assembly.as_deref()
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn object_id(&self) -> Option<ObjectId> {
        self.object_id
    }
}

/// Renders as `[<assembly>]::<method>`; instance calls render an empty assembly.
impl fmt::Display for InvocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]::{}",
            self.assembly.as_deref().unwrap_or_default(),
            self.method
        )
    }
}

/// An inbound call as seen when its result is reported back.
///
/// `call_id` is `None` for fire-and-forget calls, whose results are never
/// transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationInfo {
    call_id: Option<String>,
    target: InvocationTarget,
}

impl InvocationInfo {
    #[must_use]
    pub fn new(call_id: Option<String>, target: InvocationTarget) -> Self {
        Self { call_id, target }
    }

    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    #[must_use]
    pub fn target(&self) -> &InvocationTarget {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_target_descriptor() {
        let target = InvocationTarget::static_method("Billing", "ComputeTotal");
        assert_eq!(target.to_string(), "[Billing]::ComputeTotal");
        assert_eq!(target.object_id(), None);
    }

    #[test]
    fn instance_target_descriptor_has_empty_assembly() {
        let target = InvocationTarget::instance_method(ObjectId::new(4), "Refresh");
        assert_eq!(target.to_string(), "[]::Refresh");
        assert_eq!(target.object_id(), Some(ObjectId::new(4)));
    }

    #[test]
    fn target_deserializes_with_optional_fields() {
        let target: InvocationTarget =
            serde_json::from_value(serde_json::json!({ "method": "Ping", "objectId": 2 }))
                .unwrap();
        assert_eq!(target.assembly(), None);
        assert_eq!(target.method(), "Ping");
        assert_eq!(target.object_id(), Some(ObjectId::new(2)));
    }
}
