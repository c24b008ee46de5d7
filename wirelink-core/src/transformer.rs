use serde_json::{Map, Value};
use std::fmt;

use crate::error::ClientError;

/// Converts payloads at the wire boundary: `serialize` before a body is
/// sent, `deserialize` after a response payload is decoded.
pub trait Transformer: Send + Sync + fmt::Debug {
    fn serialize(&self, value: Value) -> Result<Value, ClientError>;
    fn deserialize(&self, value: Value) -> Result<Value, ClientError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
    fn serialize(&self, value: Value) -> Result<Value, ClientError> {
        Ok(value)
    }

    fn deserialize(&self, value: Value) -> Result<Value, ClientError> {
        Ok(value)
    }
}

/// Wraps payloads in a single-key object, `{ "<key>": value }`.
#[derive(Debug, Clone)]
pub struct WrappingTransformer {
    key: String,
}

impl WrappingTransformer {
    pub fn new(key: impl Into<String>) -> Self {
        WrappingTransformer { key: key.into() }
    }
}

impl Transformer for WrappingTransformer {
    fn serialize(&self, value: Value) -> Result<Value, ClientError> {
        let mut map = Map::with_capacity(1);
        map.insert(self.key.clone(), value);
        Ok(Value::Object(map))
    }

    fn deserialize(&self, value: Value) -> Result<Value, ClientError> {
        match value {
            Value::Object(mut map) => map.remove(&self.key).ok_or_else(|| {
                ClientError::Transformer(format!("payload has no '{}' field", self.key))
            }),
            Value::Null => Ok(Value::Null),
            other => Err(ClientError::Transformer(format!(
                "expected an object wrapping '{}', got {}",
                self.key, other
            ))),
        }
    }
}
