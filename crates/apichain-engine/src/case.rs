//! Step model: test cases, the HTTP traffic they produce, and the data that
//! flows between consecutive steps of a scenario.

use std::fmt;
use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use apichain_core::{OperationKey, ParameterLocation};

use crate::error::ExpressionError;

/// Unique identifier of a generated test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        CaseId(Uuid::new_v4())
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A concrete call of one API operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub operation: OperationKey,
    pub base_url: String,
    pub path_parameters: IndexMap<String, Value>,
    pub query: IndexMap<String, Value>,
    pub headers: IndexMap<String, String>,
    pub cookies: IndexMap<String, String>,
    pub body: Option<Value>,
}

impl Case {
    pub fn new(operation: OperationKey) -> Self {
        Case {
            id: CaseId::new(),
            operation,
            base_url: String::new(),
            path_parameters: IndexMap::new(),
            query: IndexMap::new(),
            headers: IndexMap::new(),
            cookies: IndexMap::new(),
            body: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn label(&self) -> String {
        self.operation.label()
    }

    /// Path with its templates filled in from `path_parameters`.
    pub fn formatted_path(&self) -> String {
        let mut path = self.operation.path.clone();
        for (name, value) in &self.path_parameters {
            path = path.replace(&format!("{{{name}}}"), &plain_text(value));
        }
        path
    }

    /// Absolute URL including the query string.
    pub fn full_url(&self) -> String {
        let mut url = format!("{}{}", self.base_url.trim_end_matches('/'), self.formatted_path());
        if !self.query.is_empty() {
            let query: Vec<String> = self
                .query
                .iter()
                .map(|(name, value)| format!("{name}={}", plain_text(value)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    /// Container of non-body inputs at `location`, rendered as text.
    pub fn parameter(&self, location: ParameterLocation, name: &str) -> Option<String> {
        match location {
            ParameterLocation::Path => self.path_parameters.get(name).map(plain_text),
            ParameterLocation::Query => self.query.get(name).map(plain_text),
            ParameterLocation::Header => self
                .headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone()),
            ParameterLocation::Cookie => self.cookies.get(name).cloned(),
            ParameterLocation::Body => None,
        }
    }
}

/// Text form used when a JSON value ends up in a URL or header.
pub fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn first_header<'a>(headers: &'a IndexMap<String, Vec<String>>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// The request that was actually sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub headers: IndexMap<String, Vec<String>>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    /// The request a transport would build for `case`.
    pub fn from_case(case: &Case) -> Self {
        let mut headers: IndexMap<String, Vec<String>> = case
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), vec![value.clone()]))
            .collect();
        let body = case.body.as_ref().map(|body| {
            headers
                .entry("Content-Type".to_string())
                .or_insert_with(|| vec!["application/json".to_string()]);
            body.to_string().into_bytes()
        });
        Request {
            method: case.operation.method.to_uppercase(),
            uri: case.full_url(),
            headers,
            body,
        }
    }

    pub fn body_size(&self) -> Option<usize> {
        self.body.as_ref().map(Vec::len)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub headers: IndexMap<String, Vec<String>>,
    pub body: Vec<u8>,
    pub request: Request,
    /// Whether TLS certificates were verified for this call.
    pub verify: bool,
}

impl Response {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }

    /// The body parsed as JSON, if it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// One request and, unless the network failed, its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub request: Request,
    pub response: Option<Response>,
    pub timestamp: SystemTime,
}

impl Interaction {
    pub fn new(request: Request, response: Option<Response>) -> Self {
        Interaction {
            request,
            response,
            timestamp: SystemTime::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A value pulled out of a previous step by a link expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedParam {
    /// The expression (or nested body template) it came from.
    pub definition: Value,
    pub value: Result<Value, ExpressionError>,
}

/// Data about one executed link.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// `"POST /users -> [201] GetUser -> GET /users/{id}"`
    pub id: String,
    pub parent_id: CaseId,
    pub is_inferred: bool,
    pub parameters: IndexMap<ParameterLocation, IndexMap<String, ExtractedParam>>,
    pub request_body: Option<ExtractedParam>,
}

/// Input of a single state machine step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInput {
    pub case: Case,
    /// `None` for steps that start a new chain.
    pub transition: Option<Transition>,
}

impl StepInput {
    pub fn initial(case: Case) -> Self {
        StepInput { case, transition: None }
    }
}

/// Output of a single step; the source of the next transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub response: Response,
    pub case: Case,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case() -> Case {
        let mut case = Case::new(OperationKey::new("get", "/users/{userId}/posts")).with_base_url("http://localhost/api/");
        case.path_parameters.insert("userId".to_string(), json!(42));
        case.query.insert("limit".to_string(), json!("10"));
        case.headers.insert("X-Token".to_string(), "secret".to_string());
        case
    }

    #[test]
    fn urls_are_formatted() {
        let case = case();
        assert_eq!(case.formatted_path(), "/users/42/posts");
        assert_eq!(case.full_url(), "http://localhost/api/users/42/posts?limit=10");
    }

    #[test]
    fn parameters_by_location() {
        let case = case();
        assert_eq!(case.parameter(ParameterLocation::Path, "userId").as_deref(), Some("42"));
        assert_eq!(case.parameter(ParameterLocation::Header, "x-token").as_deref(), Some("secret"));
        assert_eq!(case.parameter(ParameterLocation::Query, "offset"), None);
        assert_eq!(case.parameter(ParameterLocation::Body, "userId"), None);
    }

    #[test]
    fn requests_carry_json_bodies() {
        let mut case = case();
        case.body = Some(json!({"title": "hello"}));
        let request = Request::from_case(&case);
        assert_eq!(request.method, "GET");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body_size(), Some(r#"{"title":"hello"}"#.len()));
    }

    #[test]
    fn case_ids_are_unique() {
        assert_ne!(CaseId::new(), CaseId::new());
    }
}
