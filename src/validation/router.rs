//! Path-template router over the operations of an OpenAPI document.

use http::Method;
use regex::Regex;

use super::{
    document::OpenApiDocument,
    operation::Operation,
    schema::SchemaResolver,
};
use crate::error::EngineInitError;

const METHODS: [(&str, Method); 8] = [
    ("get", Method::GET),
    ("put", Method::PUT),
    ("post", Method::POST),
    ("delete", Method::DELETE),
    ("options", Method::OPTIONS),
    ("head", Method::HEAD),
    ("patch", Method::PATCH),
    ("trace", Method::TRACE),
];

#[derive(Debug)]
enum Segment {
    Literal(String),
    Param(String),
    /// A segment mixing literal text and parameters, e.g. `{name}.{ext}`.
    Pattern { regex: Regex, names: Vec<String> },
}

impl Segment {
    fn parse(raw: &str) -> Result<Self, String> {
        if !raw.contains('{') {
            return Ok(Self::Literal(raw.to_string()));
        }
        if let Some(name) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}'))
            && !name.contains(['{', '}'])
        {
            return Ok(Self::Param(name.to_string()));
        }

        let mut pattern = String::from("^");
        let mut names = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            let close = rest[open..]
                .find('}')
                .map(|c| open + c)
                .ok_or_else(|| format!("unterminated parameter in segment {raw:?}"))?;
            pattern.push_str(&regex::escape(&rest[..open]));
            pattern.push_str("(.+?)");
            names.push(rest[open + 1..close].to_string());
            rest = &rest[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| e.to_string())?;
        Ok(Self::Pattern { regex, names })
    }

    /// Literal segments rank before patterns, patterns before bare params.
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 0,
            Self::Pattern { .. } => 1,
            Self::Param(_) => 2,
        }
    }

    fn capture(&self, value: &str, params: &mut Vec<(String, String)>) -> bool {
        match self {
            Self::Literal(literal) => literal == value,
            Self::Param(name) => {
                if value.is_empty() {
                    return false;
                }
                params.push((name.clone(), percent_decode(value)));
                true
            }
            Self::Pattern { regex, names } => {
                let Some(captures) = regex.captures(value) else {
                    return false;
                };
                for (i, name) in names.iter().enumerate() {
                    let matched = captures.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                    params.push((name.clone(), percent_decode(matched)));
                }
                true
            }
        }
    }
}

#[derive(Debug)]
struct Route {
    template: String,
    segments: Vec<Segment>,
    operations: Vec<Operation>,
}

impl Route {
    fn rank(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::rank).collect()
    }

    fn capture(&self, segments: &[&str]) -> Option<Vec<(String, String)>> {
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::new();
        let all_match = self
            .segments
            .iter()
            .zip(segments)
            .all(|(segment, value)| segment.capture(value, &mut params));
        all_match.then_some(params)
    }

    fn operation(&self, method: &Method) -> Option<&Operation> {
        self.operations.iter().find(|op| op.method == *method)
    }
}

/// Outcome of routing a request.
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Matched {
        operation: &'a Operation,
        path_params: Vec<(String, String)>,
    },
    MethodNotAllowed {
        template: &'a str,
    },
    NotFound,
}

/// All operations of a document, ready for matching.
#[derive(Debug)]
pub struct RouteTable {
    base_path: String,
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile every operation in the document.
    pub fn build(document: &OpenApiDocument) -> Result<Self, EngineInitError> {
        let resolver = SchemaResolver::new(document.raw());
        let mut routes = Vec::new();

        for (template, raw_item) in document.paths() {
            let path_item = resolver
                .deref(raw_item)
                .map_err(|message| EngineInitError::Schema {
                    location: template.to_string(),
                    message,
                })?;

            let segments = template
                .split('/')
                .skip(1)
                .map(Segment::parse)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|message| EngineInitError::Schema {
                    location: template.to_string(),
                    message,
                })?;

            let mut operations = Vec::new();
            for (key, method) in METHODS {
                if let Some(raw_op) = path_item.get(key).filter(|v| v.is_object()) {
                    operations.push(Operation::compile(
                        method, template, path_item, raw_op, &resolver,
                    )?);
                }
            }

            routes.push(Route {
                template: template.to_string(),
                segments,
                operations,
            });
        }

        tracing::debug!(
            routes = routes.len(),
            base_path = document.base_path(),
            "Compiled OpenAPI route table"
        );

        Ok(Self {
            base_path: document.base_path().to_string(),
            routes,
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Match a request path (without query string) and method.
    ///
    /// The path is tried with the server base path stripped first, then as
    /// given. Among matching templates, the one with literal segments
    /// earliest wins; templates that define the method are preferred over
    /// those that don't.
    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        for candidate in self.candidates(path) {
            let segments: Vec<&str> = candidate.split('/').skip(1).collect();

            let mut matching: Vec<(&Route, Vec<(String, String)>)> = self
                .routes
                .iter()
                .filter_map(|route| route.capture(&segments).map(|params| (route, params)))
                .collect();
            if matching.is_empty() {
                continue;
            }
            matching.sort_by_key(|(route, _)| route.rank());

            if let Some((operation, path_params)) = matching
                .iter()
                .find_map(|(route, params)| route.operation(method).map(|op| (op, params)))
            {
                return RouteMatch::Matched {
                    operation,
                    path_params: path_params.clone(),
                };
            }
            return RouteMatch::MethodNotAllowed {
                template: &matching[0].0.template,
            };
        }
        RouteMatch::NotFound
    }

    fn candidates<'p>(&self, path: &'p str) -> Vec<&'p str> {
        let mut candidates = Vec::with_capacity(2);
        if !self.base_path.is_empty()
            && let Some(stripped) = path.strip_prefix(self.base_path.as_str())
        {
            if stripped.is_empty() {
                candidates.push("/");
            } else if stripped.starts_with('/') {
                candidates.push(stripped);
            }
        }
        candidates.push(path);
        candidates
    }
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(pair) = bytes.get(i + 1..i + 3)
            && let Ok(decoded) = hex::decode(pair)
        {
            out.extend_from_slice(&decoded);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value, json};

    use super::*;

    fn table(servers: Value) -> RouteTable {
        let document = json!({
            "openapi": "3.0.0",
            "servers": servers,
            "paths": {
                "/": { "get": { "responses": {} } },
                "/users/{id}": {
                    "get": { "responses": {} },
                    "delete": { "responses": {} }
                },
                "/users/me": { "get": { "responses": {} } },
                "/files/{name}.{ext}": { "get": { "responses": {} } },
                "/orgs/{org}/users/{id}": { "put": { "responses": {} } }
            }
        });
        RouteTable::build(&OpenApiDocument::from_value(document).unwrap()).unwrap()
    }

    fn matched(table: &RouteTable, method: Method, path: &str) -> (String, Vec<(String, String)>) {
        match table.lookup(&method, path) {
            RouteMatch::Matched {
                operation,
                path_params,
            } => (operation.template.clone(), path_params),
            other => panic!("expected a match for {method} {path}, got {other:?}"),
        }
    }

    #[test]
    fn test_literal_beats_param() {
        let table = table(json!([]));
        let (template, params) = matched(&table, Method::GET, "/users/me");
        assert_eq!(template, "/users/me");
        assert!(params.is_empty());

        let (template, params) = matched(&table, Method::GET, "/users/42");
        assert_eq!(template, "/users/{id}");
        assert_eq!(params, [("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn test_method_on_less_specific_template() {
        let table = table(json!([]));
        let (template, params) = matched(&table, Method::DELETE, "/users/me");
        assert_eq!(template, "/users/{id}");
        assert_eq!(params[0].1, "me");
    }

    #[test]
    fn test_mixed_segment_and_multiple_params() {
        let table = table(json!([]));
        let (_, params) = matched(&table, Method::GET, "/files/report.pdf");
        assert_eq!(
            params,
            [
                ("name".to_string(), "report".to_string()),
                ("ext".to_string(), "pdf".to_string())
            ]
        );

        let (_, params) = matched(&table, Method::PUT, "/orgs/acme/users/a%20b");
        assert_eq!(params[1], ("id".to_string(), "a b".to_string()));
    }

    #[rstest]
    #[case::unknown_path(Method::GET, "/nope")]
    #[case::trailing_slash(Method::GET, "/users/1/")]
    #[case::too_deep(Method::GET, "/users/1/extra")]
    #[case::empty_param(Method::GET, "/users/")]
    fn test_not_found(#[case] method: Method, #[case] path: &str) {
        let table = table(json!([]));
        assert!(matches!(table.lookup(&method, path), RouteMatch::NotFound));
    }

    #[test]
    fn test_method_not_allowed() {
        let table = table(json!([]));
        match table.lookup(&Method::POST, "/users/1") {
            RouteMatch::MethodNotAllowed { template } => assert_eq!(template, "/users/{id}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[rstest]
    #[case("/v1/users/7", "/users/{id}")]
    #[case("/v1", "/")]
    #[case("/users/7", "/users/{id}")]
    fn test_base_path(#[case] path: &str, #[case] template: &str) {
        let table = table(json!([{ "url": "https://api.example.com/v1" }]));
        assert_eq!(matched(&table, Method::GET, path).0, template);
    }

    #[test]
    fn test_root_path() {
        let table = table(json!([]));
        assert_eq!(matched(&table, Method::GET, "/").0, "/");
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("a%2Fb", "a/b")]
    #[case("100%", "100%")]
    #[case("%zz", "%zz")]
    fn test_percent_decode(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(percent_decode(raw), expected);
    }
}
