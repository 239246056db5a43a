//! OpenAPI runtime expressions.
//!
//! Supported forms: `$url`, `$method`, `$statusCode`,
//! `$request.{path,query,header}.<name>`, `$request.body[#<pointer>]`,
//! `$response.header.<name>`, `$response.body[#<pointer>]`, and string
//! templates embedding any of them in braces (`user-{$response.body#/id}`).
//!
//! An expression made of a single node evaluates to that node's JSON value;
//! templates always evaluate to a string.

use serde_json::Value;

use apichain_core::pointer::decode_pointer;
use apichain_core::ParameterLocation;

use crate::case::{plain_text, StepOutput};
use crate::error::ExpressionError;

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Variable(&'a str),
    Text(&'a str),
    /// `#/some/pointer`, including the leading `#`.
    Pointer(&'a str),
    Dot,
    LeftBrace,
    RightBrace,
}

const STOP_SYMBOLS: [u8; 5] = [b'$', b'.', b'{', b'}', b'#'];

fn tokenize(expression: &str) -> Vec<Token<'_>> {
    let bytes = expression.as_bytes();
    let mut tokens = Vec::new();
    let mut cursor = 0;
    while cursor < bytes.len() {
        let start = cursor;
        match bytes[cursor] {
            b'.' => {
                tokens.push(Token::Dot);
                cursor += 1;
            }
            b'{' => {
                tokens.push(Token::LeftBrace);
                cursor += 1;
            }
            b'}' => {
                tokens.push(Token::RightBrace);
                cursor += 1;
            }
            b'#' => {
                // `}` closes an embedded expression even inside a pointer.
                cursor += 1;
                while cursor < bytes.len() && bytes[cursor] != b'}' {
                    cursor += 1;
                }
                tokens.push(Token::Pointer(&expression[start..cursor]));
            }
            first => {
                cursor += 1;
                while cursor < bytes.len() && !STOP_SYMBOLS.contains(&bytes[cursor]) {
                    cursor += 1;
                }
                let value = &expression[start..cursor];
                tokens.push(if first == b'$' {
                    Token::Variable(value)
                } else {
                    Token::Text(value)
                });
            }
        }
    }
    tokens
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// A parsed piece of a runtime expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text between embedded expressions.
    Text(String),
    Url,
    Method,
    StatusCode,
    /// `$request.path.id`, `$request.query.q`, `$request.header.X-Token`
    Request { location: ParameterLocation, name: String },
    RequestBody { pointer: Option<String> },
    ResponseHeader { name: String },
    ResponseBody { pointer: Option<String> },
}

pub fn parse(expression: &str) -> Result<Vec<Node>, ExpressionError> {
    let unsupported = |reason: &str| ExpressionError::Unsupported {
        expression: expression.to_string(),
        reason: reason.to_string(),
    };

    let tokens = tokenize(expression);
    let mut tokens = tokens.into_iter().peekable();
    let mut nodes = Vec::new();
    let mut open = false;

    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) | Token::Pointer(text) => nodes.push(Node::Text(text.to_string())),
            Token::Dot => nodes.push(Node::Text(".".to_string())),
            Token::LeftBrace => {
                if open {
                    return Err(unsupported("nested embedded expressions are not allowed"));
                }
                open = true;
            }
            Token::RightBrace => {
                if !open {
                    return Err(unsupported("unmatched bracket"));
                }
                open = false;
            }
            Token::Variable(name) => {
                let node = match name {
                    "$url" => Node::Url,
                    "$method" => Node::Method,
                    "$statusCode" => Node::StatusCode,
                    "$request" | "$response" => {
                        if tokens.next() != Some(Token::Dot) {
                            return Err(unsupported(&format!("`{name}` should be followed by a dot")));
                        }
                        let Some(Token::Text(source)) = tokens.next() else {
                            return Err(unsupported("missing source after the dot"));
                        };
                        if source == "body" {
                            let pointer = match tokens.peek() {
                                Some(Token::Pointer(pointer)) => {
                                    let pointer = pointer.to_string();
                                    tokens.next();
                                    Some(pointer)
                                }
                                _ => None,
                            };
                            if name == "$request" {
                                Node::RequestBody { pointer }
                            } else {
                                Node::ResponseBody { pointer }
                            }
                        } else {
                            if tokens.next() != Some(Token::Dot) {
                                return Err(unsupported(&format!("`{name}.{source}` should be followed by a dot")));
                            }
                            let Some(Token::Text(parameter)) = tokens.next() else {
                                return Err(unsupported("missing parameter name"));
                            };
                            if matches!(tokens.peek(), Some(Token::Pointer(_))) {
                                return Err(unsupported("extractors are not supported"));
                            }
                            let name_matches = |expected: &str| name == expected;
                            match source {
                                "header" if name_matches("$response") => Node::ResponseHeader {
                                    name: parameter.to_string(),
                                },
                                "path" | "query" | "header" if name_matches("$request") => Node::Request {
                                    location: ParameterLocation::from_name(source)
                                        .ok_or_else(|| unsupported("unknown location"))?,
                                    name: parameter.to_string(),
                                },
                                _ => return Err(unsupported(&format!("unknown source `{source}`"))),
                            }
                        }
                    }
                    other => return Err(unsupported(&format!("unknown token `{other}`"))),
                };
                nodes.push(node);
            }
        }
    }
    if open {
        return Err(unsupported("unmatched bracket"));
    }
    Ok(nodes)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Node {
    fn evaluate(&self, expression: &str, output: &StepOutput) -> Result<Value, ExpressionError> {
        let unresolved = || ExpressionError::Unresolved {
            expression: expression.to_string(),
        };
        match self {
            Node::Text(text) => Ok(Value::String(text.clone())),
            Node::Url => Ok(Value::String(output.case.full_url())),
            Node::Method => Ok(Value::String(output.case.operation.method.to_uppercase())),
            Node::StatusCode => Ok(Value::String(output.response.status_code.to_string())),
            Node::Request { location, name } => output
                .case
                .parameter(*location, name)
                .map(Value::String)
                .ok_or_else(unresolved),
            Node::RequestBody { pointer } => {
                let body = output.case.body.as_ref().ok_or_else(unresolved)?;
                resolve(body, pointer.as_deref()).ok_or_else(unresolved)
            }
            Node::ResponseHeader { name } => output
                .response
                .header(name)
                .map(|value| Value::String(value.to_string()))
                .ok_or_else(unresolved),
            Node::ResponseBody { pointer } => {
                let body = output.response.json().ok_or_else(unresolved)?;
                resolve(&body, pointer.as_deref()).ok_or_else(unresolved)
            }
        }
    }
}

/// `pointer` is the fragment including `#`, e.g. `#/data/0/id`.
fn resolve(document: &Value, pointer: Option<&str>) -> Option<Value> {
    let Some(pointer) = pointer else {
        return Some(document.clone());
    };
    let pointer = pointer.strip_prefix('#').unwrap_or(pointer);
    if pointer.is_empty() {
        return Some(document.clone());
    }
    let mut current = document;
    for segment in pointer.strip_prefix('/')?.split('/') {
        let segment = decode_pointer(segment);
        current = match current {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Evaluates a single runtime expression against a step output.
pub fn evaluate(expression: &str, output: &StepOutput) -> Result<Value, ExpressionError> {
    let nodes = parse(expression)?;
    if let [node] = nodes.as_slice() {
        return node.evaluate(expression, output);
    }
    let mut text = String::new();
    for node in &nodes {
        match node.evaluate(expression, output)? {
            Value::Null => {}
            value => text.push_str(&plain_text(&value)),
        }
    }
    Ok(Value::String(text))
}

/// Evaluates every string inside `value`, keeping its structure.
///
/// Used for link request bodies such as `{"owner": "$response.body#/id"}`.
pub fn evaluate_nested(value: &Value, output: &StepOutput) -> Result<Value, ExpressionError> {
    match value {
        Value::String(expression) => evaluate(expression, output),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate_nested(item, output))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), evaluate_nested(item, output)?)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{Case, Request, Response};
    use apichain_core::OperationKey;
    use indexmap::IndexMap;
    use serde_json::json;

    fn output() -> StepOutput {
        let mut case = Case::new(OperationKey::new("post", "/users/{userId}/posts")).with_base_url("http://api.test");
        case.path_parameters.insert("userId".to_string(), json!("u-1"));
        case.query.insert("draft".to_string(), json!(true));
        case.headers.insert("X-Request-Id".to_string(), "r-9".to_string());
        case.body = Some(json!({"title": "Hi", "tags": ["a", "b"]}));
        let mut headers = IndexMap::new();
        headers.insert("Location".to_string(), vec!["/posts/p-7".to_string()]);
        let response = Response {
            status_code: 201,
            headers,
            body: br#"{"id": "p-7", "author": {"id": 3}, "a/b": 1, "items": [{"id": 10}]}"#.to_vec(),
            request: Request::from_case(&case),
            verify: true,
        };
        StepOutput { response, case }
    }

    #[test]
    fn simple_variables() {
        let output = output();
        assert_eq!(evaluate("$statusCode", &output).unwrap(), json!("201"));
        assert_eq!(evaluate("$method", &output).unwrap(), json!("POST"));
        assert_eq!(
            evaluate("$url", &output).unwrap(),
            json!("http://api.test/users/u-1/posts?draft=true")
        );
    }

    #[test]
    fn request_values() {
        let output = output();
        assert_eq!(evaluate("$request.path.userId", &output).unwrap(), json!("u-1"));
        assert_eq!(evaluate("$request.query.draft", &output).unwrap(), json!("true"));
        assert_eq!(evaluate("$request.header.x-request-id", &output).unwrap(), json!("r-9"));
        assert_eq!(evaluate("$request.body#/tags/1", &output).unwrap(), json!("b"));
        assert_eq!(
            evaluate("$request.body", &output).unwrap(),
            json!({"title": "Hi", "tags": ["a", "b"]})
        );
    }

    #[test]
    fn response_values() {
        let output = output();
        assert_eq!(evaluate("$response.body#/id", &output).unwrap(), json!("p-7"));
        assert_eq!(evaluate("$response.body#/author/id", &output).unwrap(), json!(3));
        assert_eq!(evaluate("$response.body#/items/0/id", &output).unwrap(), json!(10));
        assert_eq!(evaluate("$response.body#/a~1b", &output).unwrap(), json!(1));
        assert_eq!(evaluate("$response.header.location", &output).unwrap(), json!("/posts/p-7"));
    }

    #[test]
    fn templates_render_strings() {
        let output = output();
        assert_eq!(
            evaluate("post-{$response.body#/id}-by-{$response.body#/author/id}", &output).unwrap(),
            json!("post-p-7-by-3")
        );
        assert_eq!(evaluate("literal", &output).unwrap(), json!("literal"));
        assert_eq!(evaluate("v1.2", &output).unwrap(), json!("v1.2"));
    }

    #[test]
    fn missing_values_are_unresolved() {
        let output = output();
        assert!(matches!(
            evaluate("$response.body#/missing", &output),
            Err(ExpressionError::Unresolved { .. })
        ));
        assert!(matches!(
            evaluate("$request.query.page", &output),
            Err(ExpressionError::Unresolved { .. })
        ));
        assert!(matches!(
            evaluate("$response.header.ETag", &output),
            Err(ExpressionError::Unresolved { .. })
        ));
    }

    #[test]
    fn invalid_expressions() {
        for expression in [
            "$unknown",
            "$request",
            "$request.cookie.session",
            "$response.query.x",
            "{$response.body#/id",
            "$response.body#/id}",
            "{{$url}}",
            "$response.header.Location#regex:(.+)",
        ] {
            assert!(
                matches!(parse(expression), Err(ExpressionError::Unsupported { .. })),
                "{expression} should be rejected"
            );
        }
    }

    #[test]
    fn nested_bodies() {
        let output = output();
        let body = json!({"post": "$response.body#/id", "meta": {"status": "$statusCode", "count": 2}, "list": ["$method"]});
        assert_eq!(
            evaluate_nested(&body, &output).unwrap(),
            json!({"post": "p-7", "meta": {"status": "201", "count": 2}, "list": ["POST"]})
        );
    }
}
