// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The host-runtime value model.

The host is a dynamic runtime: arguments arrive as loosely-typed values and
wrapper objects travel back to it as opaque class instances. [`HostValue`]
models those values; [`HostObject`] is one wrapper instance as the host holds
it.

Constructors that take host values check the class of every object argument
*before* decoding descriptors or touching the native driver, so a mismatched
argument never leaves a native resource behind.

```
use host_gpu::host::HostValue;

let descriptor = HostValue::from(serde_json::json!({"size": 16, "usage": 9}));
assert_eq!(descriptor.get("size").map(HostValue::type_name).as_deref(), Some("number"));
```
*/

use crate::error::Error;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Largest integer a host number holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A wrapper type the host can hold.
pub trait HostClass: Clone + Send + Sync + 'static {
    /// The class name the host sees, e.g. `"GPUDevice"`.
    const CLASS_NAME: &'static str;

    /// Wraps a clone of `self` for the host.
    fn to_host(&self) -> HostValue {
        HostValue::Wrapped(HostObject::new(self.clone()))
    }
}

/// One wrapper instance held by the host.
#[derive(Clone)]
pub struct HostObject {
    class: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new<T: HostClass>(value: T) -> Self {
        HostObject {
            class: T::CLASS_NAME,
            value: Arc::new(value),
        }
    }

    pub fn class_name(&self) -> &'static str {
        self.class
    }

    pub fn is<T: HostClass>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Returns the wrapper if this object is a `T`.
    pub fn downcast<T: HostClass>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

impl Debug for HostObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[object {}]", self.class)
    }
}

/// A value passed across the host boundary.
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(u64),
    String(String),
    Array(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    Wrapped(HostObject),
}

impl HostValue {
    /// An empty plain object.
    pub fn object() -> Self {
        HostValue::Object(BTreeMap::new())
    }

    /// Sets `key` on a plain object, turning `undefined` into an object first.
    ///
    /// Any other value is returned unchanged.
    pub fn with(self, key: &str, value: HostValue) -> Self {
        match self {
            HostValue::Object(mut fields) => {
                fields.insert(key.to_string(), value);
                HostValue::Object(fields)
            }
            HostValue::Undefined => HostValue::object().with(key, value),
            other => other,
        }
    }

    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            HostValue::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    /// The host-visible type of this value, used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            HostValue::Undefined => "undefined".to_string(),
            HostValue::Null => "null".to_string(),
            HostValue::Bool(_) => "boolean".to_string(),
            HostValue::Number(_) => "number".to_string(),
            HostValue::BigInt(_) => "bigint".to_string(),
            HostValue::String(_) => "string".to_string(),
            HostValue::Array(_) => "array".to_string(),
            HostValue::Object(_) => "object".to_string(),
            HostValue::Wrapped(object) => object.class_name().to_string(),
        }
    }

    /// Converts plain data to JSON. Wrapped objects are rejected.
    ///
    /// `undefined` object members are skipped; integral numbers become JSON
    /// integers so they decode into integer fields.
    pub fn to_json(&self, path: &str) -> Result<serde_json::Value, Error> {
        use serde_json::Value;
        Ok(match self {
            HostValue::Undefined | HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Number(n) => number_to_json(*n, path)?,
            HostValue::BigInt(n) => Value::from(*n),
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| item.to_json(&format!("{path}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            HostValue::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (key, value) in fields {
                    if matches!(value, HostValue::Undefined) {
                        continue;
                    }
                    map.insert(key.clone(), value.to_json(&format!("{path}.{key}"))?);
                }
                Value::Object(map)
            }
            HostValue::Wrapped(object) => {
                return Err(Error::decode(
                    path,
                    format!("{} cannot be used as plain data", object.class_name()),
                ));
            }
        })
    }
}

fn number_to_json(n: f64, path: &str) -> Result<serde_json::Value, Error> {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        if n >= 0.0 {
            return Ok(serde_json::Value::from(n as u64));
        }
        return Ok(serde_json::Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .ok_or_else(|| Error::decode(path, format!("{n} is not a finite number")))
}

impl From<serde_json::Value> for HostValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(b),
            Value::Number(n) => match n.as_u64() {
                Some(u) if u as f64 > MAX_SAFE_INTEGER => HostValue::BigInt(u),
                _ => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => HostValue::String(s),
            Value::Array(items) => HostValue::Array(items.into_iter().map(HostValue::from).collect()),
            Value::Object(fields) => HostValue::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, HostValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

/// Unwraps a `T` from a host argument, or fails with [`Error::TypeMismatch`].
pub fn expect_object<T: HostClass>(value: &HostValue, context: &str) -> Result<T, Error> {
    let unwrapped = match value {
        HostValue::Wrapped(object) => object.downcast::<T>(),
        _ => None,
    };
    unwrapped.ok_or_else(|| Error::TypeMismatch {
        context: context.to_string(),
        expected: T::CLASS_NAME,
        found: value.type_name(),
    })
}

/// Decodes a plain-data value through serde.
pub(crate) fn decode_data<D: DeserializeOwned>(value: &HostValue, path: &str) -> Result<D, Error> {
    let json = value.to_json(path)?;
    serde_json::from_value(json).map_err(|e| Error::decode(path, e.to_string()))
}

/// Field access on a host object with path-qualified errors.
///
/// Used for descriptors that mix plain data with wrapped objects, which serde
/// cannot see.
pub(crate) struct ObjectReader<'a> {
    path: String,
    fields: &'a BTreeMap<String, HostValue>,
}

impl<'a> ObjectReader<'a> {
    /// Fails if `value` is not a plain object or carries a key outside `allowed`.
    pub(crate) fn new(value: &'a HostValue, path: &str, allowed: &[&str]) -> Result<Self, Error> {
        let HostValue::Object(fields) = value else {
            return Err(Error::decode(
                path,
                format!("expected object, found {}", value.type_name()),
            ));
        };
        if let Some(unknown) = fields.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(Error::decode(
                path,
                format!("unknown field `{unknown}`, expected one of {allowed:?}"),
            ));
        }
        Ok(ObjectReader {
            path: path.to_string(),
            fields,
        })
    }

    pub(crate) fn field_path(&self, key: &str) -> String {
        format!("{}.{}", self.path, key)
    }

    pub(crate) fn optional(&self, key: &str) -> Option<&'a HostValue> {
        self.fields.get(key).filter(|v| !v.is_nullish())
    }

    pub(crate) fn required(&self, key: &str) -> Result<&'a HostValue, Error> {
        self.optional(key)
            .ok_or_else(|| Error::decode(self.field_path(key), "missing required field"))
    }

    pub(crate) fn object<T: HostClass>(&self, key: &str) -> Result<T, Error> {
        let value = self.fields.get(key).unwrap_or(&HostValue::Undefined);
        expect_object(value, &self.field_path(key))
    }

    pub(crate) fn optional_object<T: HostClass>(&self, key: &str) -> Result<Option<T>, Error> {
        self.optional(key)
            .map(|v| expect_object(v, &self.field_path(key)))
            .transpose()
    }

    pub(crate) fn data<D: DeserializeOwned>(&self, key: &str) -> Result<D, Error> {
        decode_data(self.required(key)?, &self.field_path(key))
    }

    pub(crate) fn optional_data<D: DeserializeOwned>(&self, key: &str) -> Result<Option<D>, Error> {
        self.optional(key)
            .map(|v| decode_data(v, &self.field_path(key)))
            .transpose()
    }

    /// Elements of an optional array field, paired with their paths.
    pub(crate) fn array(&self, key: &str) -> Result<Vec<(String, &'a HostValue)>, Error> {
        match self.optional(key) {
            None => Ok(Vec::new()),
            Some(HostValue::Array(items)) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, item)| (format!("{}[{i}]", self.field_path(key)), item))
                .collect()),
            Some(other) => Err(Error::decode(
                self.field_path(key),
                format!("expected array, found {}", other.type_name()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq)]
    struct Widget(u32);
    impl HostClass for Widget {
        const CLASS_NAME: &'static str = "Widget";
    }

    #[derive(Clone, Debug)]
    struct Gadget;
    impl HostClass for Gadget {
        const CLASS_NAME: &'static str = "Gadget";
    }

    #[test]
    fn downcast_checks_the_class() {
        let value = Widget(7).to_host();
        assert_eq!(value.type_name(), "Widget");
        assert_eq!(expect_object::<Widget>(&value, "arg").unwrap(), Widget(7));
        match expect_object::<Gadget>(&value, "arg 0") {
            Err(Error::TypeMismatch {
                context,
                expected,
                found,
            }) => {
                assert_eq!(context, "arg 0");
                assert_eq!(expected, "Gadget");
                assert_eq!(found, "Widget");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            expect_object::<Widget>(&HostValue::from(3.0), "arg"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn integral_numbers_become_json_integers() {
        let value = HostValue::from(json!({"a": 16, "b": 1.5, "c": [1, 2]}))
            .with("skipped", HostValue::Undefined);
        let json = value.to_json("root").unwrap();
        assert_eq!(json, json!({"a": 16, "b": 1.5, "c": [1, 2]}));
        assert!(json["a"].is_u64());
    }

    #[test]
    fn wrapped_objects_are_not_plain_data() {
        let value = HostValue::object().with("w", Widget(1).to_host());
        match value.to_json("desc") {
            Err(Error::Decode { path, .. }) => assert_eq!(path, "desc.w"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reader_rejects_unknown_and_missing_fields() {
        let value = HostValue::from(json!({"known": 1, "extra": 2}));
        assert!(matches!(
            ObjectReader::new(&value, "D", &["known"]),
            Err(Error::Decode { .. })
        ));
        let value = HostValue::from(json!({"known": null}));
        let reader = ObjectReader::new(&value, "D", &["known", "other"]).unwrap();
        match reader.data::<u32>("known") {
            Err(Error::Decode { path, message }) => {
                assert_eq!(path, "D.known");
                assert_eq!(message, "missing required field");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(reader.optional_data::<u32>("other").unwrap().is_none());
        assert!(reader.array("other").unwrap().is_empty());
    }
}
