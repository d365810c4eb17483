//! OpenAPI 3.x document loading.

use serde_json::Value;

use crate::error::EngineInitError;

/// A parsed OpenAPI document plus the few top-level facts the router needs.
#[derive(Debug, Clone)]
pub struct OpenApiDocument {
    raw: Value,
    version: String,
    base_path: String,
}

impl OpenApiDocument {
    /// Parse a JSON or YAML document.
    ///
    /// Documents that start with `{` are read as JSON; anything else is read
    /// as YAML when the `yaml` feature is enabled.
    pub fn parse(bytes: &[u8]) -> Result<Self, EngineInitError> {
        let raw = parse_value(bytes)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self, EngineInitError> {
        if !raw.is_object() {
            return Err(EngineInitError::ParseSpec(
                "document root must be an object".to_string(),
            ));
        }

        let version = match raw.get("openapi") {
            Some(Value::String(v)) if v.starts_with("3.") => v.clone(),
            Some(Value::String(v)) => {
                return Err(EngineInitError::Unsupported(format!(
                    "openapi version {v} (only 3.x is supported)"
                )));
            }
            Some(_) => {
                return Err(EngineInitError::Unsupported(
                    "`openapi` field must be a string".to_string(),
                ));
            }
            None if raw.get("swagger").is_some() => {
                return Err(EngineInitError::Unsupported(
                    "Swagger 2.0 documents are not supported".to_string(),
                ));
            }
            None => {
                return Err(EngineInitError::Unsupported(
                    "missing `openapi` field".to_string(),
                ));
            }
        };

        if !raw.get("paths").is_none_or(Value::is_object) {
            return Err(EngineInitError::ParseSpec(
                "`paths` must be an object".to_string(),
            ));
        }

        let base_path = raw
            .pointer("/servers/0/url")
            .and_then(Value::as_str)
            .map(server_base_path)
            .unwrap_or_default();

        Ok(Self {
            raw,
            version,
            base_path,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Path prefix taken from the first server URL, without a trailing
    /// slash. Empty when there is none.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Path templates and their path-item objects, in document order.
    pub fn paths(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.raw
            .get("paths")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|paths| paths.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

fn parse_value(bytes: &[u8]) -> Result<Value, EngineInitError> {
    let trimmed = bytes.trim_ascii_start();
    if trimmed.is_empty() {
        return Err(EngineInitError::ParseSpec("document is empty".to_string()));
    }

    if trimmed.starts_with(b"{") {
        return serde_json::from_slice(trimmed)
            .map_err(|e| EngineInitError::ParseSpec(format!("invalid JSON: {e}")));
    }

    #[cfg(feature = "yaml")]
    {
        serde_yaml::from_slice(trimmed)
            .map_err(|e| EngineInitError::ParseSpec(format!("invalid YAML: {e}")))
    }

    #[cfg(not(feature = "yaml"))]
    {
        Err(EngineInitError::ParseSpec(
            "document is not JSON and YAML support is disabled".to_string(),
        ))
    }
}

/// Extract the path component of a server URL.
///
/// Absolute URLs are parsed; relative ones (`/v1`) are taken as-is. URLs with
/// unresolved server variables yield no base path.
fn server_base_path(server_url: &str) -> String {
    let path = if server_url.starts_with('/') {
        server_url.to_string()
    } else {
        match url::Url::parse(server_url) {
            Ok(url) => url.path().to_string(),
            Err(e) => {
                tracing::debug!(
                    server_url,
                    error = %e,
                    "Ignoring server URL that does not parse"
                );
                return String::new();
            }
        }
    };

    if path.contains('{') {
        return String::new();
    }
    path.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_parse_json_document() {
        let doc = OpenApiDocument::parse(
            br#"{"openapi":"3.0.3","info":{"title":"t","version":"1"},"paths":{"/a":{}}}"#,
        )
        .unwrap();
        assert_eq!(doc.version(), "3.0.3");
        assert_eq!(doc.paths().map(|(p, _)| p).collect::<Vec<_>>(), ["/a"]);
        assert_eq!(doc.base_path(), "");
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_parse_yaml_document() {
        let doc = OpenApiDocument::parse(
            b"openapi: 3.1.0\ninfo:\n  title: t\n  version: '1'\npaths:\n  /b: {}\n",
        )
        .unwrap();
        assert_eq!(doc.version(), "3.1.0");
        assert_eq!(doc.paths().count(), 1);
    }

    #[rstest]
    #[case::swagger(r#"{"swagger":"2.0","paths":{}}"#)]
    #[case::openapi_2(r#"{"openapi":"2.0","paths":{}}"#)]
    #[case::missing(r#"{"paths":{}}"#)]
    #[case::not_string(r#"{"openapi":3,"paths":{}}"#)]
    fn test_rejects_unsupported_versions(#[case] document: &str) {
        let err = OpenApiDocument::parse(document.as_bytes()).unwrap_err();
        assert!(matches!(err, EngineInitError::Unsupported(_)), "{err}");
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("   \n")]
    #[case::broken_json("{\"openapi\": ")]
    #[case::array("[1, 2]")]
    fn test_rejects_unparseable(#[case] document: &str) {
        assert!(OpenApiDocument::parse(document.as_bytes()).is_err());
    }

    #[rstest]
    #[case("https://api.example.com/v1", "/v1")]
    #[case("https://api.example.com/v1/", "/v1")]
    #[case("https://api.example.com", "")]
    #[case("/api", "/api")]
    #[case("{scheme}://example.com/v2", "")]
    #[case("https://example.com/{version}", "")]
    fn test_base_path_from_first_server(#[case] server: &str, #[case] expected: &str) {
        let document = serde_json::json!({
            "openapi": "3.0.0",
            "servers": [{ "url": server }, { "url": "https://other/v9" }],
            "paths": {}
        });
        let doc = OpenApiDocument::from_value(document).unwrap();
        assert_eq!(doc.base_path(), expected);
    }
}
