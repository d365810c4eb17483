//! Schema resolution and compilation for OpenAPI documents.
//!
//! OpenAPI schemas are almost JSON Schema: they reference each other through
//! local `$ref` pointers and use `nullable: true` instead of a `null` type.
//! Both are rewritten here so the result can be compiled by `jsonschema`.

use serde_json::Value;

use crate::error::EngineInitError;

/// Refs nested deeper than this resolve to a permissive schema, which also
/// terminates circular references.
const MAX_DEPTH: usize = 50;

/// A single schema violation.
#[derive(Debug, Clone)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Format violations as a single string for error payloads and logs.
pub fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolves `$ref` pointers against a parsed OpenAPI document.
pub struct SchemaResolver<'a> {
    document: &'a Value,
}

impl<'a> SchemaResolver<'a> {
    pub fn new(document: &'a Value) -> Self {
        Self { document }
    }

    /// Follow a chain of `$ref`s on a non-schema object (parameter,
    /// request body, response) until a concrete object is reached.
    pub fn deref<'v>(&self, value: &'v Value) -> Result<&'v Value, String>
    where
        'a: 'v,
    {
        let mut current = value;
        for _ in 0..MAX_DEPTH {
            match current.get("$ref").and_then(Value::as_str) {
                Some(pointer) => current = self.lookup(pointer)?,
                None => return Ok(current),
            }
        }
        Err("reference chain too deep".to_string())
    }

    /// Fully resolve a schema: inline every `$ref` and convert `nullable`.
    pub fn resolve(&self, schema: &Value) -> Result<Value, String> {
        self.resolve_refs(schema.clone(), 0)
    }

    fn lookup(&self, pointer: &str) -> Result<&'a Value, String> {
        let local = pointer
            .strip_prefix('#')
            .ok_or_else(|| format!("external $ref not supported: {}", pointer))?;
        self.document
            .pointer(local)
            .ok_or_else(|| format!("$ref target not found: {}", pointer))
    }

    fn resolve_refs(&self, mut schema: Value, depth: usize) -> Result<Value, String> {
        if depth > MAX_DEPTH {
            return Ok(serde_json::json!({}));
        }

        match &mut schema {
            Value::Object(map) => {
                if let Some(Value::String(ref_path)) = map.get("$ref") {
                    let target = self.lookup(ref_path)?;
                    return self.resolve_refs(target.clone(), depth + 1);
                }

                // Handled before the other keywords so that the wrapped copy
                // gets its nested schemas resolved too.
                let is_nullable = map
                    .get("nullable")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);

                if is_nullable {
                    map.remove("nullable");
                    let non_null_schema = self.resolve_refs(schema.clone(), depth + 1)?;
                    return Ok(serde_json::json!({
                        "anyOf": [
                            non_null_schema,
                            { "type": "null" }
                        ]
                    }));
                }
                map.remove("nullable");

                for key in ["allOf", "anyOf", "oneOf"] {
                    if let Some(Value::Array(items)) = map.get_mut(key) {
                        let resolved_items: Result<Vec<Value>, String> = items
                            .iter()
                            .map(|item| self.resolve_refs(item.clone(), depth + 1))
                            .collect();
                        *items = resolved_items?;
                    }
                }

                if let Some(Value::Object(props)) = map.get_mut("properties") {
                    let keys: Vec<String> = props.keys().cloned().collect();
                    for key in keys {
                        if let Some(prop) = props.remove(&key) {
                            let resolved = self.resolve_refs(prop, depth + 1)?;
                            props.insert(key, resolved);
                        }
                    }
                }

                for key in ["items", "not"] {
                    if let Some(inner) = map.remove(key) {
                        let resolved = self.resolve_refs(inner, depth + 1)?;
                        map.insert(key.to_string(), resolved);
                    }
                }

                if let Some(Value::Object(_)) = map.get("additionalProperties")
                    && let Some(ap) = map.remove("additionalProperties")
                {
                    let resolved = self.resolve_refs(ap, depth + 1)?;
                    map.insert("additionalProperties".to_string(), resolved);
                }

                Ok(schema)
            }
            Value::Array(arr) => {
                let resolved: Result<Vec<Value>, String> = arr
                    .iter()
                    .map(|item| self.resolve_refs(item.clone(), depth + 1))
                    .collect();
                Ok(Value::Array(resolved?))
            }
            _ => Ok(schema),
        }
    }
}

/// A resolved schema compiled once at engine construction.
pub struct CompiledSchema {
    resolved: Value,
    validator: jsonschema::Validator,
}

impl CompiledSchema {
    /// Resolve and compile `raw`. `location` names the schema in errors,
    /// e.g. `POST /users requestBody application/json`.
    pub fn compile(
        resolver: &SchemaResolver<'_>,
        raw: &Value,
        location: &str,
    ) -> Result<Self, EngineInitError> {
        let resolved = resolver
            .resolve(raw)
            .map_err(|message| EngineInitError::Schema {
                location: location.to_string(),
                message,
            })?;

        let validator =
            jsonschema::draft202012::new(&resolved).map_err(|e| EngineInitError::Schema {
                location: location.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            resolved,
            validator,
        })
    }

    /// The schema after ref resolution.
    pub fn resolved(&self) -> &Value {
        &self.resolved
    }

    /// Validate a JSON value, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<SchemaViolation>> {
        let errors: Vec<SchemaViolation> = self
            .validator
            .iter_errors(value)
            .map(|e| SchemaViolation {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}
