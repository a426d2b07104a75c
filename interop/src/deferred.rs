//! Completion payloads whose type is not known when they arrive.
//!
//! The reader task can parse a completion envelope far enough to find the
//! handle, but the result type lives with the pending call. The payload is
//! kept as unparsed JSON text until the dispatcher has found the call and can
//! decode it with the caller's type.

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::error::DecodeError;

/// Raw payload of one completion message. Consumed by decoding.
#[derive(Debug)]
pub struct DeferredResult {
    raw: Box<RawValue>,
}

impl DeferredResult {
    #[must_use]
    pub fn new(raw: Box<RawValue>) -> Self {
        Self { raw }
    }

    /// Wrap JSON text, validating only that it is well-formed.
    pub fn from_json(text: String) -> Result<Self, serde_json::Error> {
        RawValue::from_string(text).map(Self::new)
    }

    /// An explicit `null` payload.
    #[must_use]
    pub fn null() -> Self {
        Self::new(RawValue::NULL.to_owned())
    }

    #[must_use]
    pub fn as_json(&self) -> &str {
        self.raw.get()
    }

    /// Decode the payload as the caller's expected type.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, DecodeError> {
        serde_json::from_str(self.raw.get()).map_err(|e| DecodeError::new(type_name::<T>(), e))
    }

    /// Read the payload of a failed completion: `null` or an error message.
    pub fn decode_error(self) -> Result<Option<String>, DecodeError> {
        self.decode::<Option<String>>()
    }
}
