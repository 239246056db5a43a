//! Link synthesis: writes inferred producer -> consumer links into the
//! schema next to the author's own links, without duplicating them.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::graph::DependencyGraph;
use crate::location::ParameterLocation;
use crate::schema::{ApiSchema, OperationKey};

/// Vendor extension carrying link metadata (`is_inferred`, `merge_body`).
pub const LINK_EXTENSION: &str = "x-apichain";

/// A synthesized OpenAPI link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDefinition {
    /// Target operation, e.g. `#/paths/~1users~1{id}/get`.
    pub operation_ref: String,
    /// Qualified parameter -> runtime expression, e.g. `path.id` -> `$response.body#/id`.
    pub parameters: IndexMap<String, String>,
    /// Body property -> runtime expression, or a one-element array of
    /// expressions when the body is a list of whole resources.
    pub request_body: Option<Value>,
}

impl LinkDefinition {
    /// The link in the same shape authors use.
    pub fn to_openapi(&self) -> Value {
        let mut extension = Map::new();
        extension.insert("is_inferred".to_string(), Value::Bool(true));

        let mut link = Map::new();
        link.insert("operationRef".to_string(), Value::String(self.operation_ref.clone()));
        if !self.parameters.is_empty() {
            link.insert("parameters".to_string(), json!(self.parameters));
        }
        if let Some(body) = self.request_body.as_ref().filter(|body| !is_empty_body(body)) {
            link.insert("requestBody".to_string(), body.clone());
            extension.insert("merge_body".to_string(), Value::Bool(true));
        }
        link.insert(LINK_EXTENSION.to_string(), Value::Object(extension));
        Value::Object(link)
    }
}

fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Object(fields) => fields.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// How a link names its target operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkTarget {
    OperationId(String),
    OperationRef(String),
}

impl LinkTarget {
    /// Reads the target of a raw link definition; `operationId` wins when
    /// both are present.
    pub fn from_definition(definition: &Value) -> Option<Self> {
        if let Some(id) = definition.get("operationId").and_then(Value::as_str) {
            return Some(LinkTarget::OperationId(id.to_string()));
        }
        definition
            .get("operationRef")
            .and_then(Value::as_str)
            .map(|reference| LinkTarget::OperationRef(reference.to_string()))
    }

    pub fn resolve(&self, api: &ApiSchema) -> Option<OperationKey> {
        match self {
            LinkTarget::OperationId(id) => api.find_by_operation_id(id),
            LinkTarget::OperationRef(reference) => api.find_by_reference(reference),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LinkTarget::OperationId(value) | LinkTarget::OperationRef(value) => value,
        }
    }
}

/// Order-independent view of a link, used only for comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedLink {
    pub path: String,
    pub method: String,
    /// Location-qualified names where the location is known, bare otherwise.
    pub parameters: BTreeSet<String>,
    pub request_body: Option<Value>,
}

impl NormalizedLink {
    /// Normalizes a raw link definition. Links whose target does not
    /// resolve yield `None`.
    pub fn from_definition(api: &ApiSchema, definition: &Value) -> Option<Self> {
        let key = LinkTarget::from_definition(definition)?.resolve(api)?;
        let target = api.operation(&key).and_then(Result::ok);

        let parameters = definition
            .get("parameters")
            .and_then(Value::as_object)
            .map(|parameters| {
                parameters
                    .keys()
                    .map(|name| match ParameterLocation::split_qualified(name) {
                        Some((location, bare)) => location.qualify(bare),
                        None => target
                            .as_ref()
                            .and_then(|operation| operation.find_parameter(name))
                            .map_or_else(|| name.clone(), |parameter| parameter.location.qualify(name)),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(NormalizedLink {
            path: key.path,
            method: key.method,
            parameters,
            request_body: definition.get("requestBody").cloned(),
        })
    }

    /// Whether `self` adds nothing over `other`.
    ///
    /// Same target, parameters a subset, and every body field present in
    /// `other` with an equal value.
    pub fn is_subset_of(&self, other: &NormalizedLink) -> bool {
        if self.path != other.path || self.method != other.method {
            return false;
        }
        if !self.parameters.is_subset(&other.parameters) {
            return false;
        }
        match (&self.request_body, &other.request_body) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(Value::Object(mine)), Some(Value::Object(theirs))) => mine
                .iter()
                .all(|(key, value)| theirs.get(key) == Some(value)),
            (Some(mine), Some(theirs)) => mine == theirs,
        }
    }
}

/// Injects every link of `graph` into `api` that is not already covered by
/// a declared link on the same response.
///
/// Name collisions are resolved by appending `_0`, `_1`, ... Returns the
/// number of links added.
pub fn inject_links(api: &mut ApiSchema, graph: &DependencyGraph) -> usize {
    let mut injected = 0;
    for response in graph.iter_links() {
        let declared: Vec<NormalizedLink> = api
            .response_links(&response.producer)
            .into_iter()
            .filter(|(status_code, _)| *status_code == response.status_code)
            .flat_map(|(_, links)| links.into_iter().map(|(_, definition)| definition))
            .filter_map(|definition| NormalizedLink::from_definition(api, &definition))
            .collect();

        let mut additions = Vec::new();
        for (name, link) in &response.links {
            let definition = link.to_openapi();
            let covered = NormalizedLink::from_definition(api, &definition)
                .is_some_and(|candidate| declared.iter().any(|existing| candidate.is_subset_of(existing)));
            if covered {
                debug!(
                    source = %response.producer.label(),
                    status_code = %response.status_code,
                    link = %name,
                    "inferred link already covered by a declared one"
                );
                continue;
            }
            additions.push((name.clone(), definition));
        }
        if additions.is_empty() {
            continue;
        }

        let Some(links) = api.response_links_mut(&response.producer, &response.status_code) else {
            continue;
        };
        for (name, definition) in additions {
            let name = unique_name(links, name);
            links.insert(name, definition);
            injected += 1;
        }
    }
    info!(injected, "injected inferred links");
    injected
}

fn unique_name(links: &Map<String, Value>, name: String) -> String {
    if !links.contains_key(&name) {
        return name;
    }
    let mut suffix = 0;
    loop {
        let candidate = format!("{name}_{suffix}");
        if !links.contains_key(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
