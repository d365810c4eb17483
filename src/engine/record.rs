//! NDJSON log records describing one validated exchange.

use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use serde::Serialize;

pub const LOG_RECORD_VERSION: &str = "1.0.0-alpha";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub version: &'static str,
    /// Unix milliseconds when the exchange started.
    pub date_created: i64,
    /// Milliseconds spent inside the engine.
    pub execution_time: f64,
    pub request: RequestRecord,
    pub response: ResponseRecord,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub http_protocol: String,
    pub uri: String,
    /// The matched path template, empty when no route matched.
    pub resource: String,
    pub method: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status_code: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

impl LogRecord {
    pub fn new(
        started: DateTime<Utc>,
        elapsed: Duration,
        request: RequestRecord,
        response: ResponseRecord,
    ) -> Self {
        Self {
            version: LOG_RECORD_VERSION,
            date_created: started.timestamp_millis(),
            execution_time: elapsed.as_micros() as f64 / 1000.0,
            request,
            response,
        }
    }

    /// One JSON object terminated by a newline.
    pub fn to_ndjson(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

impl RequestRecord {
    pub fn capture(
        method: &Method,
        uri: &Uri,
        version: Version,
        headers: &HeaderMap,
        resource: &str,
        body: &[u8],
    ) -> Self {
        Self {
            http_protocol: format!("{version:?}"),
            uri: uri.to_string(),
            resource: resource.to_string(),
            method: method.to_string(),
            headers: header_record(headers),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

impl ResponseRecord {
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        Self {
            status_code: status.as_u16(),
            headers: header_record(headers),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

fn header_record(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut record: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        record
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    record
}
