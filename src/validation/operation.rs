//! Compiled operations: parameters, request bodies, and responses with their
//! schemas compiled ahead of time.

use std::collections::HashMap;

use http::Method;
use serde_json::Value;

use super::schema::{CompiledSchema, SchemaResolver, SchemaViolation};
use crate::error::EngineInitError;

/// Header parameters the OpenAPI spec says to ignore.
const IGNORED_HEADER_PARAMS: [&str; 3] = ["accept", "content-type", "authorization"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }
}

#[derive(Debug)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    schema: Option<CompiledSchema>,
}

impl Parameter {
    /// Coerce the raw string values of this parameter to the schema's
    /// type and validate the result.
    ///
    /// Repeated values (`?tag=a&tag=b`) form an array; a single value for an
    /// array schema is split on commas.
    pub fn validate(&self, raw: &[String]) -> Result<(), Vec<SchemaViolation>> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        let value = coerce_values(raw, schema.resolved());
        schema.validate(&value)
    }
}

/// One entry of a `content` map.
#[derive(Debug)]
pub struct MediaType {
    pub media_range: String,
    pub schema: Option<CompiledSchema>,
}

#[derive(Debug)]
pub struct RequestBodySpec {
    pub required: bool,
    pub content: Vec<MediaType>,
}

#[derive(Debug)]
pub struct ResponseSpec {
    pub content: Vec<MediaType>,
}

/// Responses of an operation, looked up by exact status, then `NXX`, then
/// `default`.
#[derive(Debug, Default)]
pub struct Responses {
    exact: HashMap<u16, ResponseSpec>,
    ranges: HashMap<u16, ResponseSpec>,
    default: Option<ResponseSpec>,
}

impl Responses {
    pub fn lookup(&self, status: u16) -> Option<&ResponseSpec> {
        self.exact
            .get(&status)
            .or_else(|| self.ranges.get(&(status / 100)))
            .or(self.default.as_ref())
    }
}

#[derive(Debug)]
pub struct Operation {
    pub method: Method,
    pub template: String,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBodySpec>,
    pub responses: Responses,
}

impl Operation {
    /// Compile one operation. Path-item parameters are merged in, and
    /// operation parameters with the same name and location override them.
    pub fn compile(
        method: Method,
        template: &str,
        path_item: &Value,
        operation: &Value,
        resolver: &SchemaResolver<'_>,
    ) -> Result<Self, EngineInitError> {
        let label = format!("{method} {template}");

        let mut parameters: Vec<Parameter> = Vec::new();
        for list in [path_item.get("parameters"), operation.get("parameters")] {
            let Some(list) = list.and_then(Value::as_array) else {
                continue;
            };
            for raw in list {
                let Some(parameter) = compile_parameter(raw, resolver, &label)? else {
                    continue;
                };
                parameters.retain(|p| {
                    !(p.location == parameter.location && p.name == parameter.name)
                });
                parameters.push(parameter);
            }
        }

        let request_body = match operation.get("requestBody") {
            Some(raw) => {
                let body = resolver
                    .deref(raw)
                    .map_err(|message| schema_error(&label, "requestBody", message))?;
                Some(RequestBodySpec {
                    required: body
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    content: compile_content(
                        body.get("content"),
                        resolver,
                        &format!("{label} requestBody"),
                    )?,
                })
            }
            None => None,
        };

        let mut responses = Responses::default();
        if let Some(raw_responses) = operation.get("responses").and_then(Value::as_object) {
            for (key, raw) in raw_responses {
                let response = resolver
                    .deref(raw)
                    .map_err(|message| schema_error(&label, key, message))?;
                let spec = ResponseSpec {
                    content: compile_content(
                        response.get("content"),
                        resolver,
                        &format!("{label} response {key}"),
                    )?,
                };
                insert_response(&mut responses, key, spec);
            }
        }

        Ok(Self {
            method,
            template: template.to_string(),
            parameters,
            request_body,
            responses,
        })
    }
}

fn insert_response(responses: &mut Responses, key: &str, spec: ResponseSpec) {
    if key.eq_ignore_ascii_case("default") {
        responses.default = Some(spec);
    } else if let Ok(status) = key.parse::<u16>() {
        responses.exact.insert(status, spec);
    } else if key.len() == 3
        && key.is_ascii()
        && key[1..].eq_ignore_ascii_case("xx")
        && let Some(class) = key[..1].parse::<u16>().ok().filter(|c| (1..=5).contains(c))
    {
        responses.ranges.insert(class, spec);
    } else {
        tracing::debug!(key, "Ignoring response key that is not a status code");
    }
}

fn compile_parameter(
    raw: &Value,
    resolver: &SchemaResolver<'_>,
    label: &str,
) -> Result<Option<Parameter>, EngineInitError> {
    let param = resolver
        .deref(raw)
        .map_err(|message| schema_error(label, "parameters", message))?;

    let Some(name) = param.get("name").and_then(Value::as_str) else {
        return Err(schema_error(
            label,
            "parameters",
            "parameter without a name".to_string(),
        ));
    };
    let Some(location) = param
        .get("in")
        .and_then(Value::as_str)
        .and_then(ParamLocation::parse)
    else {
        return Err(schema_error(
            label,
            name,
            "parameter without a valid `in`".to_string(),
        ));
    };

    if location == ParamLocation::Header
        && IGNORED_HEADER_PARAMS.contains(&name.to_ascii_lowercase().as_str())
    {
        return Ok(None);
    }

    // Path parameters are always required.
    let required = location == ParamLocation::Path
        || param
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);

    let schema = match param.get("schema") {
        Some(raw_schema) => Some(CompiledSchema::compile(
            resolver,
            raw_schema,
            &format!("{label} parameter {}:{name}", location.as_str()),
        )?),
        None => None,
    };

    Ok(Some(Parameter {
        name: name.to_string(),
        location,
        required,
        schema,
    }))
}

fn compile_content(
    content: Option<&Value>,
    resolver: &SchemaResolver<'_>,
    location: &str,
) -> Result<Vec<MediaType>, EngineInitError> {
    let Some(content) = content.and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    content
        .iter()
        .map(|(media_range, media)| {
            let schema = match media.get("schema") {
                Some(raw) => Some(CompiledSchema::compile(
                    resolver,
                    raw,
                    &format!("{location} {media_range}"),
                )?),
                None => None,
            };
            Ok(MediaType {
                media_range: media_range.to_ascii_lowercase(),
                schema,
            })
        })
        .collect()
}

fn schema_error(label: &str, part: &str, message: String) -> EngineInitError {
    EngineInitError::Schema {
        location: format!("{label} {part}"),
        message,
    }
}

/// The `type/subtype` part of a content type, lower-cased.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether a media type carries JSON.
pub fn is_json(essence: &str) -> bool {
    essence == "application/json" || essence.ends_with("+json")
}

/// Find the declared media type that best matches a content type: exact
/// match first, then `type/*`, then `*/*`.
pub fn find_media_type<'a>(content: &'a [MediaType], content_type: &str) -> Option<&'a MediaType> {
    let wanted = essence(content_type);
    let wildcard = wanted
        .split_once('/')
        .map(|(kind, _)| format!("{kind}/*"));

    content
        .iter()
        .find(|m| essence(&m.media_range) == wanted)
        .or_else(|| {
            wildcard
                .as_deref()
                .and_then(|w| content.iter().find(|m| m.media_range == w))
        })
        .or_else(|| content.iter().find(|m| m.media_range == "*/*"))
}

fn scalar_type(schema: &Value) -> Option<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => return Some(t),
        Some(Value::Array(types)) => {
            return types.iter().filter_map(Value::as_str).find(|t| *t != "null");
        }
        _ => {}
    }
    ["anyOf", "oneOf"]
        .iter()
        .filter_map(|key| schema.get(key).and_then(Value::as_array))
        .flatten()
        .find_map(|s| scalar_type(s).filter(|t| *t != "null"))
}

fn coerce_values(raw: &[String], schema: &Value) -> Value {
    if scalar_type(schema) == Some("array") {
        let items = schema.get("items").unwrap_or(&Value::Null);
        let values: Vec<Value> = match raw {
            [single] if single.is_empty() => Vec::new(),
            [single] => single.split(',').map(|v| coerce(v, items)).collect(),
            many => many.iter().map(|v| coerce(v, items)).collect(),
        };
        return Value::Array(values);
    }
    raw.first()
        .map(|v| coerce(v, schema))
        .unwrap_or(Value::Null)
}

/// Convert a string to the schema's scalar type. Values that don't convert
/// stay strings so validation reports the type mismatch.
fn coerce(raw: &str, schema: &Value) -> Value {
    match scalar_type(schema) {
        Some("integer") => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some("number") => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Some("boolean") => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        _ => Value::String(raw.to_string()),
    }
}
