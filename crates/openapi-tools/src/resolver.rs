//! `OpenAPI` `$ref` resolver.
//!
//! The `openapiv3` crate models `$ref`s using `ReferenceOr<T>` but does not resolve them.
//! This resolver keeps the whole document as a JSON value and supports:
//! - typed resolution of parameters, request bodies, responses and path items
//! - recursive inlining of `$ref`s nested anywhere inside schemas
//!
//! Only local refs (`#/...`) are supported. External (file / URL) refs and cycles are
//! rejected with a [`SpecError`]: a published tool schema must be self-contained.

use crate::error::{Result, SpecError};
use openapiv3::{OpenAPI, ReferenceOr, Schema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug)]
pub struct DocumentResolver {
    root: Value,
}

impl DocumentResolver {
    /// Create a resolver over a parsed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be converted into JSON.
    pub fn new(doc: &OpenAPI) -> Result<Self> {
        let root = serde_json::to_value(doc).map_err(|e| SpecError::InvalidRefTarget {
            reference: "#".to_string(),
            expected: "OpenAPI document",
            message: e.to_string(),
        })?;
        Ok(Self { root })
    }

    /// Resolver over a raw JSON document (used by tests and by callers that already hold JSON).
    #[must_use]
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Resolve a (possibly chained) typed `$ref`.
    ///
    /// # Errors
    ///
    /// Returns an error for external, dangling or cyclic refs, or when the target does not
    /// deserialize as `T`.
    pub fn resolve<T>(&self, r: &ReferenceOr<T>, expected: &'static str) -> Result<T>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur = r.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok(item),
                ReferenceOr::Reference { reference } => {
                    if !seen.insert(reference.clone()) {
                        return Err(SpecError::CyclicRef { reference });
                    }
                    let value = self.lookup(&reference)?.clone();
                    cur = serde_json::from_value(value).map_err(|e| {
                        SpecError::InvalidRefTarget {
                            reference: reference.clone(),
                            expected,
                            message: e.to_string(),
                        }
                    })?;
                }
            }
        }
    }

    /// Convert a schema (or schema ref) into a self-contained JSON Schema value.
    ///
    /// # Errors
    ///
    /// Returns an error if any nested `$ref` cannot be resolved.
    pub fn schema_value(&self, schema: &ReferenceOr<Schema>) -> Result<Value> {
        let raw = match schema {
            ReferenceOr::Item(s) => serde_json::to_value(s).map_err(|e| {
                SpecError::InvalidRefTarget {
                    reference: "#".to_string(),
                    expected: "schema",
                    message: e.to_string(),
                }
            })?,
            ReferenceOr::Reference { reference } => serde_json::json!({ "$ref": reference }),
        };
        self.inline_schema(&raw)
    }

    /// Recursively replace every `{"$ref": ...}` inside `schema` by its target.
    ///
    /// Sibling keys next to a `$ref` (e.g. `description`) override the target's keys.
    ///
    /// # Errors
    ///
    /// Returns an error for external, dangling or cyclic refs.
    pub fn inline_schema(&self, schema: &Value) -> Result<Value> {
        let mut stack: Vec<String> = Vec::new();
        self.inline(schema, &mut stack)
    }

    fn inline(&self, value: &Value, stack: &mut Vec<String>) -> Result<Value> {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    if stack.iter().any(|r| r == reference) {
                        return Err(SpecError::CyclicRef {
                            reference: reference.clone(),
                        });
                    }
                    let target = self.lookup(reference)?;
                    stack.push(reference.clone());
                    let mut resolved = self.inline(target, stack)?;
                    if let Value::Object(obj) = &mut resolved {
                        for (k, v) in map.iter().filter(|(k, _)| k.as_str() != "$ref") {
                            obj.insert(k.clone(), self.inline(v, stack)?);
                        }
                    }
                    stack.pop();
                    return Ok(resolved);
                }

                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.inline(v, stack)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.inline(v, stack))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, reference: &str) -> Result<&Value> {
        let Some(fragment) = reference.strip_prefix('#') else {
            return Err(SpecError::ExternalRef {
                reference: reference.to_string(),
            });
        };

        if fragment.is_empty() {
            return Ok(&self.root);
        }
        if !fragment.starts_with('/') {
            return Err(SpecError::UnresolvedRef {
                reference: reference.to_string(),
            });
        }

        // `Value::pointer` handles the `~0` / `~1` escapes.
        self.root
            .pointer(fragment)
            .ok_or_else(|| SpecError::UnresolvedRef {
                reference: reference.to_string(),
            })
    }
}
