use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::errors::EncodeError;

/// A JSON object advertised by a device. Peers identify it by its string `id` field.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        return Self(Map::new());
    }

    pub fn id(&self) -> Option<&str> {
        return self.0.get("id")?.as_str();
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        return self.0.get(key);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        return self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        return &self.0;
    }

    pub fn into_inner(self) -> Map<String, Value> {
        return self.0;
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        return Self(map);
    }
}

impl TryFrom<Value> for Document {
    type Error = EncodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        return match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(EncodeError::NotAnObject)
        };
    }
}
