//! A JSON object wrapper used for node outputs and workflow variables.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Ordered map of string keys to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars {
    inner: Map<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed read of a key; `None` when the key is missing or has another shape.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<T> {
        self.inner.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_value(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn set<T: Into<Value>>(
        &mut self,
        key: &str,
        value: T,
    ) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn insert(
        &mut self,
        key: String,
        value: Value,
    ) {
        self.inner.insert(key, value);
    }

    /// Builder-style `set`.
    pub fn with<T: Into<Value>>(
        mut self,
        key: &str,
        value: T,
    ) -> Self {
        self.set(key, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<Value> for Vars {
    /// Non-object values are wrapped under the `value` key.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(inner) => Self {
                inner,
            },
            Value::Null => Self::default(),
            other => Self::default().with("value", other),
        }
    }
}

impl From<Vars> for Value {
    fn from(vars: Vars) -> Self {
        Value::Object(vars.inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Vars;

    #[test]
    fn test_typed_get() {
        let vars = Vars::new().with("count", 3).with("name", "alpha");
        assert_eq!(vars.get::<u32>("count"), Some(3));
        assert_eq!(vars.get::<String>("name"), Some("alpha".to_string()));
        assert_eq!(vars.get::<u32>("name"), None);
    }

    #[test]
    fn test_from_non_object() {
        let vars = Vars::from(json!([1, 2]));
        assert_eq!(vars.get_value("value"), Some(&json!([1, 2])));
        assert!(Vars::from(json!(null)).is_empty());
    }
}
