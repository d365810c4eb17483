//! Turns decoded host buffers into HTTP values the engine understands.

use std::collections::BTreeMap;

use axum::{body::Body, extract::Request};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde::Deserialize;

use crate::{capture::CapturedResponse, error::DecodeError, ffi::codec::decode_str};

/// A header entry in the host's JSON: a list of values or a single one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    Many(Vec<String>),
    One(String),
}

/// Decode a JSON object of headers. Absent input is an empty map.
///
/// Multiple values for one name are joined with `", "`. Names are
/// lower-cased by `http::HeaderName`.
pub fn decode_headers(field: &'static str, raw: Option<&[u8]>) -> Result<HeaderMap, DecodeError> {
    let Some(raw) = raw else {
        return Ok(HeaderMap::new());
    };

    let parsed: BTreeMap<String, HeaderValues> = serde_json::from_slice(raw)
        .map_err(|source| DecodeError::MalformedHeaders { field, source })?;

    let mut headers = HeaderMap::with_capacity(parsed.len());
    for (name, values) in parsed {
        let joined = match values {
            HeaderValues::Many(values) if values.is_empty() => continue,
            HeaderValues::Many(values) => values.join(", "),
            HeaderValues::One(value) => value,
        };

        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DecodeError::InvalidHeaderName {
                field,
                name: name.clone(),
            })?;
        let header_value = HeaderValue::from_bytes(joined.as_bytes())
            .map_err(|_| DecodeError::InvalidHeaderValue { field, name })?;
        headers.append(header_name, header_value);
    }
    Ok(headers)
}

/// The request a validate call asks about.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProbeRequest {
    pub fn decode(
        method: Option<&[u8]>,
        path: Option<&[u8]>,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Self, DecodeError> {
        let method = decode_str("method", method)?.unwrap_or_default();
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| DecodeError::InvalidMethod(method.to_string()))?;

        let path = decode_str("path", path)?.unwrap_or_default();
        if path.is_empty() {
            return Err(DecodeError::InvalidPath(String::new()));
        }
        let uri = Uri::try_from(path).map_err(|_| DecodeError::InvalidPath(path.to_string()))?;

        Ok(Self {
            method,
            uri,
            headers,
            body: body.unwrap_or_default(),
        })
    }

    pub fn into_request(self) -> Request {
        let mut request = Request::new(Body::from(self.body));
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;
        request
    }
}

/// Build the upstream triple a response validation replays.
pub fn upstream_response(
    status: i32,
    headers: HeaderMap,
    body: Option<Bytes>,
) -> Result<CapturedResponse, DecodeError> {
    let status = u16::try_from(status)
        .ok()
        .filter(|s| (100..=999).contains(s))
        .and_then(|s| StatusCode::from_u16(s).ok())
        .ok_or(DecodeError::InvalidStatus(status))?;

    Ok(CapturedResponse::new(
        status,
        headers,
        body.unwrap_or_default(),
    ))
}

/// The allow-undefined-routes flag, kept raw until a verdict needs it.
#[derive(Debug, Clone, Default)]
pub struct AllowUndefinedRoutes(Option<Bytes>);

impl AllowUndefinedRoutes {
    pub fn new(raw: Option<Bytes>) -> Self {
        Self(raw)
    }

    /// Absent means `false`. Accepts `true/false`, `on/off`, `yes/no`, and
    /// `1/0`, case-insensitively.
    pub fn resolve(&self) -> Result<bool, DecodeError> {
        let Some(raw) = &self.0 else {
            return Ok(false);
        };
        let invalid = || DecodeError::InvalidFlag {
            field: "allow_undefined_routes",
            value: String::from_utf8_lossy(raw).into_owned(),
        };

        let text = std::str::from_utf8(raw).map_err(|_| invalid())?;
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Ok(true),
            "false" | "off" | "no" | "0" => Ok(false),
            _ => Err(invalid()),
        }
    }
}
