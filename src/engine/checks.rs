//! Request and response conformance checks for one matched operation.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri, header::CONTENT_TYPE};
use serde_json::Value;

use super::payload::ErrorPayload;
use crate::validation::{
    MediaType, Operation, ParamLocation, essence, find_media_type, is_json, join_violations,
};

/// Check parameters and body of a request against its operation.
pub(crate) fn check_request(
    operation: &Operation,
    path_params: &[(String, String)],
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), ErrorPayload> {
    let query: Vec<(String, String)> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    for parameter in &operation.parameters {
        let values: Vec<String> = match parameter.location {
            ParamLocation::Path => matching(path_params, &parameter.name),
            ParamLocation::Query => matching(&query, &parameter.name),
            ParamLocation::Header => headers
                .get_all(parameter.name.as_str())
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect(),
            ParamLocation::Cookie => cookie_values(headers, &parameter.name),
        };

        let location = parameter.location.as_str();
        if values.is_empty() {
            if parameter.required {
                return Err(ErrorPayload::bad_request(
                    "missing required request parameter",
                    format!("{location} parameter {} is required", parameter.name),
                ));
            }
            continue;
        }

        if let Err(violations) = parameter.validate(&values) {
            return Err(ErrorPayload::bad_request(
                "request parameter invalid",
                format!(
                    "{location} parameter {}: {}",
                    parameter.name,
                    join_violations(&violations)
                ),
            ));
        }
    }

    let Some(request_body) = &operation.request_body else {
        return Ok(());
    };

    if body.is_empty() {
        if request_body.required {
            return Err(ErrorPayload::bad_request(
                "request body required",
                "the operation requires a request body but none was sent",
            ));
        }
        return Ok(());
    }

    let content_type = content_type(headers);
    let Some((media, effective)) = select_media(&request_body.content, &content_type) else {
        return Err(ErrorPayload::unsupported_media_type(&content_type));
    };

    check_json_body(media, &effective, body).map_err(|failure| match failure {
        BodyFailure::NotJson(e) => {
            ErrorPayload::bad_request("request body is not valid JSON", e.to_string())
        }
        BodyFailure::Schema(detail) => ErrorPayload::bad_request("request body invalid", detail),
    })
}

/// Check status, content type, and body of a response against its operation.
pub(crate) fn check_response(
    operation: &Operation,
    status: StatusCode,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), ErrorPayload> {
    let Some(response) = operation.responses.lookup(status.as_u16()) else {
        return Err(ErrorPayload::response_status_undefined(status.as_u16()));
    };

    if response.content.is_empty() || body.is_empty() {
        return Ok(());
    }

    let content_type = content_type(headers);
    let Some((media, effective)) = select_media(&response.content, &content_type) else {
        return Err(ErrorPayload::response_violation(
            "response content type not declared",
            format!("content type {content_type:?} is not declared for status {status}"),
        ));
    };

    check_json_body(media, &effective, body).map_err(|failure| match failure {
        BodyFailure::NotJson(e) => {
            ErrorPayload::response_violation("response body is not valid JSON", e.to_string())
        }
        BodyFailure::Schema(detail) => {
            ErrorPayload::response_violation("response body invalid", detail)
        }
    })
}

/// Pick the declared media type a body is checked against, along with the
/// content type to treat it as.
///
/// Without a `Content-Type` the body is checked against the only declared
/// media type, or the JSON one when there are several.
fn select_media<'a>(content: &'a [MediaType], content_type: &str) -> Option<(&'a MediaType, String)> {
    if !content_type.trim().is_empty() {
        return find_media_type(content, content_type).map(|media| (media, content_type.to_string()));
    }
    let media = match content {
        [only] => Some(only),
        _ => content.iter().find(|m| is_json(&essence(&m.media_range))),
    }?;
    Some((media, media.media_range.clone()))
}

enum BodyFailure {
    NotJson(serde_json::Error),
    Schema(String),
}

/// Validate a body against a media type's schema when the body is JSON.
/// Non-JSON bodies are only checked for a declared content type.
fn check_json_body(media: &MediaType, content_type: &str, body: &Bytes) -> Result<(), BodyFailure> {
    let Some(schema) = &media.schema else {
        return Ok(());
    };
    if !is_json(&essence(content_type)) {
        return Ok(());
    }

    let value: Value = serde_json::from_slice(body).map_err(BodyFailure::NotJson)?;
    schema
        .validate(&value)
        .map_err(|violations| BodyFailure::Schema(join_violations(&violations)))
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}

fn matching(pairs: &[(String, String)], name: &str) -> Vec<String> {
    pairs
        .iter()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
        .collect()
}

fn cookie_values(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .collect()
}
