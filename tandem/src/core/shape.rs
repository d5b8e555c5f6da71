//! Boundary validation.
//!
//! A [`Shape`] decides whether a JSON value fits a declared contract and turns
//! it into a typed value. The engine never builds validators itself; it only
//! asks a shape to decode, encode, or accept.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use validator::Validate;

/// Reason a value was refused by a shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct Rejection {
    reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<serde_json::Error> for Rejection {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Validator capability for one side of a method declaration.
pub trait Shape: Clone + Send + Sync + 'static {
    /// Typed form of an accepted value
    type Value: Send + 'static;

    /// Accept and convert, or reject with a reason
    fn decode(&self, value: &Value) -> Result<Self::Value, Rejection>;

    /// Convert a typed value back to JSON for the wire
    fn encode(&self, value: &Self::Value) -> Result<Value, Rejection>;

    fn accepts(&self, value: &Value) -> bool {
        self.decode(value).is_ok()
    }
}

/// Shape backed by serde: a value is accepted when it deserializes into `T`.
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Json<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Json<T> {}

impl<T> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json<{}>", std::any::type_name::<T>())
    }
}

impl<T> Shape for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn decode(&self, value: &Value) -> Result<T, Rejection> {
        Ok(T::deserialize(value)?)
    }

    fn encode(&self, value: &T) -> Result<Value, Rejection> {
        Ok(serde_json::to_value(value)?)
    }
}

/// Accepts only `null`. Methods declared with it may be called without an argument.
pub type Empty = Json<()>;

/// Accepts any JSON value unchanged.
pub type Any = Json<Value>;

/// Serde decoding followed by the field rules of [`validator::Validate`].
pub struct Validated<T>(PhantomData<fn() -> T>);

impl<T> Validated<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Validated<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Validated<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Validated<T> {}

impl<T> fmt::Debug for Validated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validated<{}>", std::any::type_name::<T>())
    }
}

impl<T> Shape for Validated<T>
where
    T: Serialize + DeserializeOwned + Validate + Send + 'static,
{
    type Value = T;

    fn decode(&self, value: &Value) -> Result<T, Rejection> {
        let decoded = T::deserialize(value)?;
        decoded
            .validate()
            .map_err(|e| Rejection::new(e.to_string()))?;
        Ok(decoded)
    }

    fn encode(&self, value: &T) -> Result<Value, Rejection> {
        Ok(serde_json::to_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    #[derive(Debug, Serialize, Deserialize, Validate)]
    struct Ticker {
        #[validate(length(min = 1))]
        symbol: String,
        #[validate(range(min = 1, max = 60))]
        period_secs: u32,
    }

    #[test]
    fn json_shape_decodes_matching_values() {
        let shape = Json::<Point>::new();
        assert_eq!(
            shape.decode(&json!({ "x": 1, "y": -2 })).unwrap(),
            Point { x: 1, y: -2 }
        );
        assert!(!shape.accepts(&json!({ "x": "one", "y": 2 })));
        assert!(!shape.accepts(&Value::Null));
    }

    #[test]
    fn empty_accepts_only_null() {
        let shape = Empty::new();
        assert!(shape.accepts(&Value::Null));
        assert!(!shape.accepts(&json!(0)));
        assert_eq!(shape.encode(&()).unwrap(), Value::Null);
    }

    #[test]
    fn option_shape_accepts_null() {
        assert!(Json::<Option<Point>>::new().accepts(&Value::Null));
    }

    #[test]
    fn any_accepts_everything() {
        let shape = Any::new();
        assert!(shape.accepts(&json!([1, "two", null])));
        assert!(shape.accepts(&Value::Null));
    }

    #[test]
    fn validated_shape_applies_field_rules() {
        let shape = Validated::<Ticker>::new();
        assert!(shape.accepts(&json!({ "symbol": "ABC", "period_secs": 5 })));

        let err = shape
            .decode(&json!({ "symbol": "ABC", "period_secs": 0 }))
            .unwrap_err();
        assert!(err.reason().contains("period_secs"), "{}", err);

        assert!(!shape.accepts(&json!({ "symbol": "", "period_secs": 5 })));
    }
}
