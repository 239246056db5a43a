//! Runtime view of schema links.
//!
//! Every declared or injected link becomes a [`StatefulLink`]: a validated,
//! resolved edge from one operation's response to another operation, able
//! to extract the parameters of the next call from a finished step.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use apichain_core::links::LINK_EXTENSION;
use apichain_core::{ApiSchema, LinkTarget, Operation, OperationKey, ParameterLocation};

use crate::case::{ExtractedParam, StepOutput, Transition};
use crate::error::TransitionError;
use crate::expressions::{self, Node};

/// A link parameter with its container resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkParameter {
    pub location: ParameterLocation,
    pub name: String,
    /// Usually a runtime expression; literals are passed through.
    pub expression: Value,
}

impl LinkParameter {
    /// `path.id`, as used for adaptive statistics.
    pub fn qualified_name(&self) -> String {
        self.location.qualify(&self.name)
    }
}

/// A validated link between two operations.
#[derive(Debug, Clone, PartialEq)]
pub struct StatefulLink {
    pub name: String,
    pub status_code: String,
    pub source: OperationKey,
    pub target: OperationKey,
    pub parameters: Vec<LinkParameter>,
    pub body: Option<Value>,
    /// Merge the link body into a generated body instead of replacing it.
    pub merge_body: bool,
    pub is_inferred: bool,
    /// Non-`default` status codes declared by the source operation.
    pub source_status_codes: Vec<String>,
}

impl StatefulLink {
    /// Resolves and validates a raw link definition found on a response of
    /// `source`.
    pub fn new(
        api: &ApiSchema,
        name: &str,
        status_code: &str,
        source: &Operation,
        definition: &Value,
    ) -> Result<Self, TransitionError> {
        let link_target = LinkTarget::from_definition(definition).ok_or_else(|| TransitionError::MissingTarget {
            name: name.to_string(),
        })?;
        let not_found = || TransitionError::OperationNotFound {
            reference: link_target.as_str().to_string(),
        };
        let target_key = link_target.resolve(api).ok_or_else(not_found)?;
        let target = match api.operation(&target_key) {
            Some(Ok(operation)) => operation,
            _ => return Err(not_found()),
        };

        let mut parameters = Vec::new();
        if let Some(declared) = definition.get("parameters").and_then(Value::as_object) {
            for (key, expression) in declared {
                if let Value::String(expression) = expression {
                    validate_expression(expression, source)?;
                }
                let (location, parameter_name) = match ParameterLocation::split_qualified(key) {
                    Some((ParameterLocation::Body, _)) => {
                        return Err(TransitionError::InvalidLocation {
                            location: ParameterLocation::Body.to_string(),
                        })
                    }
                    Some((location, bare)) => (location, bare.to_string()),
                    None => {
                        let parameter =
                            target
                                .find_parameter(key)
                                .ok_or_else(|| TransitionError::UnknownParameter {
                                    name: key.clone(),
                                    target: target.label(),
                                })?;
                        (parameter.location, key.clone())
                    }
                };
                parameters.push(LinkParameter {
                    location,
                    name: parameter_name,
                    expression: expression.clone(),
                });
            }
        }

        let extension = definition.get(LINK_EXTENSION);
        let flag = |key: &str, default: bool| {
            extension
                .and_then(|extension| extension.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(default)
        };

        Ok(StatefulLink {
            name: name.to_string(),
            status_code: status_code.to_string(),
            source: source.key(),
            target: target_key,
            parameters,
            body: definition.get("requestBody").cloned(),
            merge_body: flag("merge_body", true),
            is_inferred: flag("is_inferred", false),
            source_status_codes: source
                .responses
                .iter()
                .map(|response| response.status_code.clone())
                .filter(|code| code != "default")
                .collect(),
        })
    }

    /// `"POST /users -> [201] GetUser -> GET /users/{id}"`
    pub fn id(&self) -> String {
        format!(
            "{} -> [{}] {} -> {}",
            self.source.label(),
            self.status_code,
            self.name,
            self.target.label()
        )
    }

    /// Whether a response with `status` can feed this link.
    ///
    /// `2XX`-style codes match the whole class; `default` matches only codes
    /// no other response of the source operation covers.
    pub fn matches_status(&self, status: u16) -> bool {
        if self.status_code == "default" {
            return !self
                .source_status_codes
                .iter()
                .any(|declared| status_code_matches(declared, status));
        }
        status_code_matches(&self.status_code, status)
    }

    pub fn extract(&self, output: &StepOutput) -> Transition {
        Transition {
            id: self.id(),
            parent_id: output.case.id,
            is_inferred: self.is_inferred,
            parameters: self.extract_parameters(output),
            request_body: self.extract_body(output),
        }
    }

    /// Extracted values grouped by location, then by parameter name.
    pub fn extract_parameters(&self, output: &StepOutput) -> IndexMap<ParameterLocation, IndexMap<String, ExtractedParam>> {
        let mut extracted: IndexMap<ParameterLocation, IndexMap<String, ExtractedParam>> = IndexMap::new();
        for parameter in &self.parameters {
            let value = match &parameter.expression {
                Value::String(expression) => expressions::evaluate(expression, output),
                literal => Ok(literal.clone()),
            };
            extracted.entry(parameter.location).or_default().insert(
                parameter.name.clone(),
                ExtractedParam {
                    definition: parameter.expression.clone(),
                    value,
                },
            );
        }
        extracted
    }

    pub fn extract_body(&self, output: &StepOutput) -> Option<ExtractedParam> {
        self.body.as_ref().map(|body| ExtractedParam {
            definition: body.clone(),
            value: expressions::evaluate_nested(body, output),
        })
    }
}

/// `pattern` is a declared status code such as `201` or `5XX`.
fn status_code_matches(pattern: &str, status: u16) -> bool {
    let actual = status.to_string();
    pattern.len() == actual.len()
        && pattern
            .chars()
            .zip(actual.chars())
            .all(|(expected, actual)| expected.eq_ignore_ascii_case(&'x') || expected == actual)
}

/// `$request.*` expressions may only name parameters the source declares.
fn validate_expression(expression: &str, source: &Operation) -> Result<(), TransitionError> {
    for node in expressions::parse(expression)? {
        if let Node::Request { location, name } = node {
            if source.get_parameter(location, &name).is_none() {
                return Err(TransitionError::UnknownParameter {
                    name,
                    target: source.label(),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ApiTransitions
// ---------------------------------------------------------------------------

/// Indexes into [`ApiTransitions::links`] touching one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationTransitions {
    pub incoming: Vec<usize>,
    pub outgoing: Vec<usize>,
}

/// Every valid link of a schema, indexed by operation label.
#[derive(Debug, Clone, Default)]
pub struct ApiTransitions {
    links: Vec<StatefulLink>,
    operations: IndexMap<String, OperationTransitions>,
}

impl ApiTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the links of every response. Invalid links are logged and
    /// skipped.
    pub fn from_schema(api: &ApiSchema) -> Self {
        let mut transitions = Self::new();
        for result in api.operations() {
            let Ok(operation) = result else {
                continue;
            };
            for (status_code, links) in api.response_links(&operation.key()) {
                for (name, definition) in &links {
                    match StatefulLink::new(api, name, &status_code, &operation, definition) {
                        Ok(link) => transitions.add_link(link),
                        Err(err) => warn!(
                            link = %name,
                            source = %operation.label(),
                            status_code = %status_code,
                            error = %err,
                            "skipping invalid link"
                        ),
                    }
                }
            }
        }
        debug!(
            links = transitions.links.len(),
            operations = transitions.operations.len(),
            "collected transitions"
        );
        transitions
    }

    pub fn add_link(&mut self, link: StatefulLink) {
        let idx = self.links.len();
        self.operations
            .entry(link.source.label())
            .or_default()
            .outgoing
            .push(idx);
        self.operations
            .entry(link.target.label())
            .or_default()
            .incoming
            .push(idx);
        self.links.push(link);
    }

    pub fn links(&self) -> &[StatefulLink] {
        &self.links
    }

    pub fn operations(&self) -> &IndexMap<String, OperationTransitions> {
        &self.operations
    }

    pub fn incoming<'a>(&'a self, label: &str) -> impl Iterator<Item = &'a StatefulLink> + 'a {
        let indices = self
            .operations
            .get(label)
            .map(|operation| operation.incoming.as_slice())
            .unwrap_or_default();
        indices.iter().map(move |&idx| &self.links[idx])
    }

    pub fn outgoing<'a>(&'a self, label: &str) -> impl Iterator<Item = &'a StatefulLink> + 'a {
        let indices = self
            .operations
            .get(label)
            .map(|operation| operation.outgoing.as_slice())
            .unwrap_or_default();
        indices.iter().map(move |&idx| &self.links[idx])
    }

    pub fn has_outgoing(&self, label: &str) -> bool {
        self.operations
            .get(label)
            .is_some_and(|operation| !operation.outgoing.is_empty())
    }

    /// Number of operations that can start at least one transition.
    pub fn sources_with_outgoing(&self) -> usize {
        self.operations
            .values()
            .filter(|operation| !operation.outgoing.is_empty())
            .count()
    }

    /// Operations with outgoing links but no incoming ones; chains start here.
    pub fn root_operations(&self) -> impl Iterator<Item = &str> {
        self.operations
            .iter()
            .filter(|(_, operation)| operation.incoming.is_empty() && !operation.outgoing.is_empty())
            .map(|(label, _)| label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{Case, Request, Response};
    use crate::error::ExpressionError;
    use serde_json::json;

    fn api() -> ApiSchema {
        ApiSchema::from_value(json!({
            "openapi": "3.0.0",
            "paths": {
                "/users": {"post": {
                    "operationId": "createUser",
                    "parameters": [{"name": "tenant", "in": "query", "schema": {"type": "string"}}],
                    "responses": {"201": {"description": "", "links": {
                        "GetUser": {"operationId": "getUser", "parameters": {"userId": "$response.body#/id"}},
                        "UpdateUser": {
                            "operationRef": "#/paths/~1users~1{userId}/patch",
                            "parameters": {"path.userId": "$response.body#/id", "query.tenant": "$request.query.tenant"},
                            "requestBody": {"name": "$response.body#/name", "active": true},
                            "x-apichain": {"is_inferred": true, "merge_body": false}
                        },
                        "Broken": {"operationId": "missing"},
                        "BadParameter": {"operationId": "getUser", "parameters": {"nope": "$response.body#/id"}},
                        "BadSource": {"operationId": "getUser", "parameters": {"userId": "$request.path.id"}},
                        "NoTarget": {"parameters": {}}
                    }}}
                }},
                "/users/{userId}": {
                    "get": {
                        "operationId": "getUser",
                        "parameters": [{"name": "userId", "in": "path", "required": true, "schema": {"type": "string"}}],
                        "responses": {"200": {"description": ""}}
                    },
                    "patch": {
                        "parameters": [
                            {"name": "userId", "in": "path", "required": true, "schema": {"type": "string"}},
                            {"name": "tenant", "in": "query", "schema": {"type": "string"}}
                        ],
                        "responses": {"200": {"description": ""}}
                    }
                }
            }
        }))
        .unwrap()
    }

    fn output() -> StepOutput {
        let mut case = Case::new(OperationKey::new("post", "/users"));
        case.query.insert("tenant".to_string(), json!("acme"));
        let response = Response {
            status_code: 201,
            headers: IndexMap::new(),
            body: br#"{"id": "u-1", "name": "Ann"}"#.to_vec(),
            request: Request::from_case(&case),
            verify: true,
        };
        StepOutput { response, case }
    }

    #[test]
    fn valid_links_are_collected() {
        let transitions = ApiTransitions::from_schema(&api());
        let names: Vec<&str> = transitions.links().iter().map(|link| link.name.as_str()).collect();
        assert_eq!(names, vec!["GetUser", "UpdateUser"]);
        assert!(transitions.has_outgoing("POST /users"));
        assert!(!transitions.has_outgoing("GET /users/{userId}"));
        assert_eq!(transitions.incoming("GET /users/{userId}").count(), 1);
        assert_eq!(transitions.sources_with_outgoing(), 1);
        assert_eq!(transitions.root_operations().collect::<Vec<_>>(), vec!["POST /users"]);
    }

    #[test]
    fn link_errors() {
        let api = api();
        let source = api.operation(&OperationKey::new("post", "/users")).unwrap().unwrap();
        let build = |definition: Value| StatefulLink::new(&api, "Link", "201", &source, &definition);

        assert_eq!(
            build(json!({"operationId": "missing"})),
            Err(TransitionError::OperationNotFound {
                reference: "missing".to_string()
            })
        );
        assert_eq!(
            build(json!({"operationId": "getUser", "parameters": {"nope": "$response.body#/id"}})),
            Err(TransitionError::UnknownParameter {
                name: "nope".to_string(),
                target: "GET /users/{userId}".to_string()
            })
        );
        assert_eq!(
            build(json!({"operationId": "getUser", "parameters": {"userId": "$request.path.id"}})),
            Err(TransitionError::UnknownParameter {
                name: "id".to_string(),
                target: "POST /users".to_string()
            })
        );
        assert_eq!(
            build(json!({"operationId": "getUser", "parameters": {"body.userId": "$response.body#/id"}})),
            Err(TransitionError::InvalidLocation {
                location: "body".to_string()
            })
        );
        assert_eq!(
            build(json!({})),
            Err(TransitionError::MissingTarget {
                name: "Link".to_string()
            })
        );
        assert!(matches!(
            build(json!({"operationId": "getUser", "parameters": {"userId": "$nope"}})),
            Err(TransitionError::Expression(ExpressionError::Unsupported { .. }))
        ));
    }

    #[test]
    fn extraction() {
        let transitions = ApiTransitions::from_schema(&api());
        let output = output();

        let get = &transitions.links()[0];
        assert!(!get.is_inferred);
        assert!(get.merge_body);
        let transition = get.extract(&output);
        assert_eq!(transition.id, "POST /users -> [201] GetUser -> GET /users/{userId}");
        assert_eq!(transition.parent_id, output.case.id);
        assert_eq!(
            transition.parameters[&ParameterLocation::Path]["userId"].value,
            Ok(json!("u-1"))
        );
        assert!(transition.request_body.is_none());

        let update = &transitions.links()[1];
        assert!(update.is_inferred);
        assert!(!update.merge_body);
        let transition = update.extract(&output);
        assert_eq!(
            transition.parameters[&ParameterLocation::Query]["tenant"].value,
            Ok(json!("acme"))
        );
        assert_eq!(
            transition.request_body.unwrap().value,
            Ok(json!({"name": "Ann", "active": true}))
        );
    }

    #[test]
    fn status_matching() {
        let transitions = ApiTransitions::from_schema(&api());
        let mut link = transitions.links()[0].clone();
        assert!(link.matches_status(201));
        assert!(!link.matches_status(200));
        link.status_code = "2XX".to_string();
        assert!(link.matches_status(204));
        assert!(!link.matches_status(404));
        link.status_code = "default".to_string();
        assert!(link.matches_status(500));
        assert!(!link.matches_status(201));
    }

    #[test]
    fn default_links_skip_declared_codes() {
        let api = ApiSchema::from_value(json!({
            "openapi": "3.0.0",
            "paths": {
                "/users": {"post": {
                    "responses": {
                        "201": {"description": ""},
                        "4XX": {"description": ""},
                        "default": {"description": "", "links": {
                            "GetError": {"operationId": "getError"}
                        }}
                    }
                }},
                "/errors": {"get": {
                    "operationId": "getError",
                    "responses": {"200": {"description": ""}}
                }}
            }
        }))
        .unwrap();
        let transitions = ApiTransitions::from_schema(&api);
        let link = &transitions.links()[0];
        assert_eq!(link.status_code, "default");
        assert_eq!(link.source_status_codes, vec!["201".to_string(), "4XX".to_string()]);
        assert!(!link.matches_status(201));
        assert!(!link.matches_status(404));
        assert!(link.matches_status(200));
        assert!(link.matches_status(500));
    }
}
