//! The JSON-native leaf value set used for callback-args, and validation of
//! values submitted by callers before a [`crate::CallbackArgs`] is allowed to
//! cross into a [`crate::RequestTask`] wrapper.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A hash whose values are restricted to the JSON-native leaf set: string,
/// finite number, boolean, null, and recursive arrays/objects of the same.
///
/// Values are transported verbatim from the submitting job context to the
/// callback across the continuation-job boundary, so they must round-trip
/// through `serde_json` without loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackArgs(Map<String, Value>);

/// A callback-args value failed validation at task construction time.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CallbackArgsError {
    /// A number was `NaN` or infinite; only finite JSON numbers are allowed.
    #[error("non-finite number at {path}")]
    NonFiniteNumber {
        /// Dotted/bracketed path to the offending value, for diagnostics.
        path: String,
    },
    /// The top-level value wasn't a JSON object.
    #[error("callback-args must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl CallbackArgs {
    /// An empty callback-args map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and wrap a JSON object as callback-args.
    ///
    /// Every value, including nested array/object members, must be a finite
    /// JSON leaf value. Non-object top-level values are rejected by the type
    /// system (callers pass a `Map`), matching spec's "a hash whose keys are
    /// strings".
    pub fn try_from_map(map: Map<String, Value>) -> Result<Self, CallbackArgsError> {
        for (key, value) in &map {
            validate_value(value, key)?;
        }
        Ok(Self(map))
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume this wrapper, returning the underlying JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Value> for CallbackArgs {
    type Error = CallbackArgsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::try_from_map(map),
            Value::Null => Err(CallbackArgsError::NotAnObject("null")),
            Value::Bool(_) => Err(CallbackArgsError::NotAnObject("bool")),
            Value::Number(_) => Err(CallbackArgsError::NotAnObject("number")),
            Value::String(_) => Err(CallbackArgsError::NotAnObject("string")),
            Value::Array(_) => Err(CallbackArgsError::NotAnObject("array")),
        }
    }
}

fn validate_value(value: &Value, path: &str) -> Result<(), CallbackArgsError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CallbackArgsError::NonFiniteNumber {
                        path: path.to_string(),
                    });
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                validate_value(item, &format!("{path}[{idx}]"))?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, item) in map {
                validate_value(item, &format!("{path}.{key}"))?;
            }
            Ok(())
        }
    }
}
