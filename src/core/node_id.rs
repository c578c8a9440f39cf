//! Opaque reference ids
//!
//! A node id names one row: the output type plus its primary-key values,
//! serialized as a JSON array and encoded with URL-safe base64.

use crate::core::error::MutationError;
use crate::core::value::SqlValue;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

/// Decoded form of an opaque id
#[derive(Debug, Clone, PartialEq)]
pub struct NodeId {
    pub type_name: String,
    pub keys: Vec<SqlValue>,
}

impl NodeId {
    pub fn new(type_name: impl Into<String>, keys: Vec<SqlValue>) -> Self {
        Self {
            type_name: type_name.into(),
            keys,
        }
    }

    /// Encode to the opaque token handed to clients
    pub fn encode(&self) -> String {
        let mut parts = Vec::with_capacity(self.keys.len() + 1);
        parts.push(Value::String(self.type_name.clone()));
        parts.extend(
            self.keys
                .iter()
                .map(|k| serde_json::to_value(k).unwrap_or(Value::Null)),
        );
        URL_SAFE_NO_PAD.encode(Value::Array(parts).to_string())
    }

    /// Decode a token of any type
    pub fn decode(token: &str) -> Result<Self, MutationError> {
        let invalid = || MutationError::invalid_input(format!("invalid id '{}'", token));

        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let parts: Vec<Value> = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        let (head, rest) = parts.split_first().ok_or_else(invalid)?;
        let type_name = head.as_str().ok_or_else(invalid)?.to_string();
        let keys = rest
            .iter()
            .map(|v| serde_json::from_value::<SqlValue>(v.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;

        if keys.is_empty() {
            return Err(invalid());
        }

        Ok(Self { type_name, keys })
    }

    /// Decode a token that must name a row of `type_name` with `arity` keys
    pub fn decode_for(token: &str, type_name: &str, arity: usize) -> Result<Self, MutationError> {
        let id = Self::decode(token)?;
        if id.type_name != type_name {
            return Err(MutationError::invalid_input(format!(
                "id refers to a {}, expected a {}",
                id.type_name, type_name
            )));
        }
        if id.keys.len() != arity {
            return Err(MutationError::invalid_input(format!(
                "id for {} carries {} key values, expected {}",
                type_name,
                id.keys.len(),
                arity
            )));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let id = NodeId::new("User", vec![SqlValue::Int(42)]);
        let token = id.encode();
        assert!(!token.contains('='));
        assert_eq!(NodeId::decode(&token).unwrap(), id);
    }

    #[test]
    fn test_composite_key() {
        let id = NodeId::new("PostTag", vec![SqlValue::Int(1), SqlValue::Int(7)]);
        let decoded = NodeId::decode_for(&id.encode(), "PostTag", 2).unwrap();
        assert_eq!(decoded.keys, vec![SqlValue::Int(1), SqlValue::Int(7)]);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let token = NodeId::new("Post", vec![SqlValue::Int(1)]).encode();
        let err = NodeId::decode_for(&token, "User", 1).unwrap_err();
        assert!(err.message.contains("expected a User"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(NodeId::decode("%%%").is_err());
        let no_keys = URL_SAFE_NO_PAD.encode(r#"["User"]"#);
        assert!(NodeId::decode(&no_keys).is_err());
    }
}
