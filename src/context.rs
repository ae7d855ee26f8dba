//! Run-scoped data context
//!
//! Thread-safe typed key/value store that carries values between modules
//! during one run. Every key is either schema-registered (cardinality and
//! element type known, writes type-checked) or legacy (untyped
//! append-to-list on write). External inputs enter through the unvalidated
//! `seed` path.
//!
//! Concurrency: one reader/writer lock over the whole store. Writes are
//! exclusive, reads may overlap, cardinality decisions are made under the
//! write lock. The context is agnostic to producer identity.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::warn;

use crate::contract::Cardinality;
use crate::error::{Result, SentraError};

/// Registered schema for one key
#[derive(Debug, Clone, PartialEq)]
pub struct KeySchema {
    pub element_type: String,
    pub cardinality: Cardinality,
}

#[derive(Default)]
struct Inner {
    values: FxHashMap<String, Value>,
    schemas: FxHashMap<String, KeySchema>,
}

/// Shared data context for a single run
///
/// Cloning is cheap; all clones share the same store.
#[derive(Clone, Default)]
pub struct DataContext {
    inner: Arc<RwLock<Inner>>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the element type and cardinality for a key
    ///
    /// Idempotent. A conflicting re-registration keeps the first schema,
    /// since a key's cardinality is stable across its lifetime.
    pub fn register_type(
        &self,
        key: impl Into<String>,
        element_type: impl Into<String>,
        cardinality: Cardinality,
    ) {
        let key = key.into();
        let schema = KeySchema {
            element_type: element_type.into(),
            cardinality,
        };
        let mut inner = self.inner.write();
        if let Some(existing) = inner.schemas.get(&key) {
            if *existing != schema {
                warn!(
                    component = "context",
                    key = %key,
                    "conflicting re-registration ignored; keeping original schema"
                );
            }
            return;
        }
        inner.schemas.insert(key, schema);
    }

    /// Overwrite a Single-cardinality key with a type-checked value
    pub fn publish(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.write();
        let schema = inner.schemas.get(key).ok_or_else(|| {
            SentraError::ContextSchemaViolation {
                key: key.to_string(),
                details: "publish requires a registered schema".to_string(),
            }
        })?;
        if schema.cardinality != Cardinality::Single {
            return Err(SentraError::ContextSchemaViolation {
                key: key.to_string(),
                details: "publish is only valid for Single cardinality".to_string(),
            });
        }
        check_type(key, &schema.element_type, &value)?;
        inner.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Append a type-checked element to a List-cardinality key
    pub fn append(&self, key: &str, item: Value) -> Result<()> {
        let mut inner = self.inner.write();
        let schema = inner.schemas.get(key).cloned().ok_or_else(|| {
            SentraError::ContextSchemaViolation {
                key: key.to_string(),
                details: "append requires a registered schema".to_string(),
            }
        })?;
        if schema.cardinality != Cardinality::List {
            return Err(SentraError::ContextSchemaViolation {
                key: key.to_string(),
                details: "append is only valid for List cardinality".to_string(),
            });
        }
        check_type(key, &schema.element_type, &item)?;

        match inner.values.get_mut(key) {
            Some(Value::Array(list)) => list.push(item),
            Some(_) => {
                return Err(SentraError::ContextSchemaViolation {
                    key: key.to_string(),
                    details: "stored value is not a list".to_string(),
                })
            }
            None => {
                inner.values.insert(key.to_string(), Value::Array(vec![item]));
            }
        }
        Ok(())
    }

    /// Write without any type check; used for external inputs at run start
    pub fn seed(&self, key: impl Into<String>, value: Value) {
        self.inner.write().values.insert(key.into(), value);
    }

    /// Legacy untyped write path
    ///
    /// Used when outputs stream in before any schema is registered:
    /// absent key -> one-element list, list -> append, scalar -> promote to
    /// `[old, new]`.
    pub fn append_unchecked(&self, key: &str, item: Value) {
        let mut inner = self.inner.write();
        match inner.values.get_mut(key) {
            Some(Value::Array(list)) => list.push(item),
            Some(existing) => {
                let old = existing.take();
                *existing = Value::Array(vec![old, item]);
            }
            None => {
                inner.values.insert(key.to_string(), Value::Array(vec![item]));
            }
        }
    }

    /// Read a key, returning `None` when absent
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().values.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().values.contains_key(key)
    }

    /// Registered schema for a key, if any
    pub fn schema(&self, key: &str) -> Option<KeySchema> {
        self.inner.read().schemas.get(key).cloned()
    }

    /// Shallow copy of all entries; the run result
    pub fn snapshot(&self) -> FxHashMap<String, Value> {
        self.inner.read().values.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().values.is_empty()
    }
}

/// Validate a value against a registered element type tag
fn check_type(key: &str, type_tag: &str, value: &Value) -> Result<()> {
    let ok = match type_tag {
        "string" => value.is_string(),
        "int" => value.is_i64() || value.is_u64(),
        "float" => value.is_number(),
        "bool" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        // unknown tags (including "any") accept everything
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(SentraError::ContextSchemaViolation {
            key: key.to_string(),
            details: format!("expected {}, got {}", type_tag, json_type_name(value)),
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
